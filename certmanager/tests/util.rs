#![allow(dead_code)]

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConnection};
use time::OffsetDateTime;

pub fn in_a_month() -> OffsetDateTime {
	OffsetDateTime::now_utc() + time::Duration::days(30)
}

/// Drive a handshake between two in-memory connections.
pub fn handshake(
	client: &mut ClientConnection,
	server: &mut ServerConnection,
) -> Result<(), rustls::Error> {
	for _ in 0..16 {
		let mut buf = Vec::new();
		client.write_tls(&mut buf).unwrap();
		if !buf.is_empty() {
			server.read_tls(&mut buf.as_slice()).unwrap();
			server.process_new_packets()?;
		}
		let mut buf = Vec::new();
		server.write_tls(&mut buf).unwrap();
		if !buf.is_empty() {
			client.read_tls(&mut buf.as_slice()).unwrap();
			client.process_new_packets()?;
		}
		let idle = !client.wants_write() && !server.wants_write();
		if idle && !client.is_handshaking() && !server.is_handshaking() {
			return Ok(());
		}
	}
	panic!("handshake did not complete");
}

/// A client connection trusting `roots` that presents no certificate.
pub fn anonymous_client(roots: RootCertStore, server_name: &str) -> ClientConnection {
	let provider = Arc::new(rustls::crypto::ring::default_provider());
	let config = ClientConfig::builder_with_provider(provider)
		.with_safe_default_protocol_versions()
		.unwrap()
		.with_root_certificates(roots)
		.with_no_client_auth();
	let name = ServerName::try_from(server_name).unwrap().to_owned();
	ClientConnection::new(Arc::new(config), name).unwrap()
}
