//! Command Line argument parsing

use std::{path::PathBuf, time::Duration};

use bpaf::{Bpaf, Parser};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version)]
/// Management of TLS certificates kept in a secret store
pub struct Options {
	/// Log debug output, RUST_LOG takes precedence
	#[bpaf(short, long)]
	pub verbose: bool,
	#[bpaf(external(command))]
	pub command: Command,
}

#[derive(Clone, Debug, Bpaf)]
pub enum Command {
	/// Download a certificate and its key
	#[bpaf(command)]
	Download(#[bpaf(external(download_args))] DownloadArgs),
	/// Generate certificates and keys
	#[bpaf(command)]
	Gen(#[bpaf(external(gen_command))] GenCommand),
}

#[derive(Clone, Debug, Bpaf)]
pub enum GenCommand {
	/// Generate a CA certificate and upload it
	#[bpaf(command("ca-cert"))]
	CaCert(#[bpaf(external(ca_cert_args))] CaCertArgs),
	/// Generate a certificate signed by a CA
	#[bpaf(command("signed-cert"))]
	SignedCert(#[bpaf(external(signed_cert_args))] SignedCertArgs),
}

#[derive(Clone, Debug, Bpaf)]
pub struct DownloadArgs {
	/// Secret URL, e.g. https://myvault.vault.azure.net/secrets/mycert
	#[bpaf(long, env("URL"), argument("URL"))]
	pub url: String,
	/// Certificate password, leave out if none
	#[bpaf(long, argument("PASSWORD"), fallback(String::new()))]
	pub cert_password: String,
	#[bpaf(external(out_dir))]
	pub out_dir: PathBuf,
	#[bpaf(external(timeout))]
	pub timeout: Duration,
}

#[derive(Clone, Debug, Bpaf)]
pub struct CaCertArgs {
	/// Certificate URL to upload the CA to, e.g. https://myvault.vault.azure.net/certificates/myca
	#[bpaf(long, argument("URL"))]
	pub ca_url: String,
	/// Certificate Authority (CA) name, must match the name in the URL
	#[bpaf(long, argument("NAME"))]
	pub name: String,
	/// CA certificate password, leave out if none
	#[bpaf(long, argument("PASSWORD"), fallback(String::new()))]
	pub cert_password: String,
	#[bpaf(external(timeout))]
	pub timeout: Duration,
	#[bpaf(external(expire_at))]
	pub expire_at: OffsetDateTime,
}

#[derive(Clone, Debug, Bpaf)]
pub struct SignedCertArgs {
	/// URL of the CA certificate secret, e.g. https://myvault.vault.azure.net/secrets/myca
	#[bpaf(long, env("CA_URL"), argument("URL"))]
	pub ca_url: String,
	/// CA certificate password, leave out if none
	#[bpaf(long, argument("PASSWORD"), fallback(String::new()))]
	pub ca_cert_password: String,
	/// Hostname for a server, e.g. '*.dev.my.domain.com', or any id for a client
	#[bpaf(long, argument("NAME"))]
	pub common_name: String,
	/// Comma-separated alternative domain names (apply multiple times for more)
	#[bpaf(long, argument::<String>("DOMAINS"), many, map(split_domains))]
	pub domains: Vec<String>,
	#[bpaf(external(out_dir))]
	pub out_dir: PathBuf,
	#[bpaf(external(timeout))]
	pub timeout: Duration,
	#[bpaf(external(expire_at))]
	pub expire_at: OffsetDateTime,
}

/// Output directory, must not be an existing file
fn out_dir() -> impl bpaf::Parser<PathBuf> {
	bpaf::long("out-dir")
		.help("Output directory")
		.argument::<PathBuf>("DIR")
		.fallback(PathBuf::from("."))
		.debug_fallback()
		.guard(|dir| !dir.is_file(), "output directory must not be a file")
}

/// Seconds before giving up on the secret store
fn timeout() -> impl bpaf::Parser<Duration> {
	bpaf::long("timeout")
		.help("Timeout in seconds before giving up")
		.argument::<u64>("SECS")
		.guard(|secs| *secs > 0, "timeout must be positive")
		.fallback(10)
		.display_fallback()
		.map(Duration::from_secs)
}

/// Expiry of the generated certificate, ten years from now unless given
fn expire_at() -> impl bpaf::Parser<OffsetDateTime> {
	bpaf::long("expire-at")
		.help("RFC3339 date when the certificate will expire, ten years from now by default")
		.argument::<String>("RFC3339")
		.parse(|s| OffsetDateTime::parse(&s, &Rfc3339))
		.fallback_with(|| Ok::<_, String>(ten_years_from_now()))
}

fn ten_years_from_now() -> OffsetDateTime {
	let now = OffsetDateTime::now_utc();
	now.replace_year(now.year() + 10)
		.unwrap_or(now + time::Duration::days(3652))
}

/// Split comma-separated domain lists, dropping empty entries.
fn split_domains(lists: Vec<String>) -> Vec<String> {
	lists
		.iter()
		.flat_map(|list| list.split(','))
		.map(str::trim)
		.filter(|domain| !domain.is_empty())
		.map(String::from)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;

	fn parse(args: &[&str]) -> Result<Options, bpaf::ParseFailure> {
		options().run_inner(args)
	}

	#[test]
	fn test_split_domains() {
		let lists = vec!["a.example, b.example".to_string(), ",c.example,".into()];
		assert_eq!(
			split_domains(lists),
			vec!["a.example", "b.example", "c.example"]
		);
	}

	#[test]
	fn download_defaults() {
		let opts = parse(&["download", "--url", "https://v.example/secrets/x"]).unwrap();
		assert!(!opts.verbose);
		let Command::Download(args) = opts.command else {
			panic!("expected download");
		};
		assert_eq!(args.url, "https://v.example/secrets/x");
		assert_eq!(args.cert_password, "");
		assert_eq!(args.out_dir, PathBuf::from("."));
		assert_eq!(args.timeout, Duration::from_secs(10));
	}

	#[test]
	fn signed_cert_args() {
		let opts = parse(&[
			"-v",
			"gen",
			"signed-cert",
			"--ca-url",
			"https://v.example/secrets/ca",
			"--common-name",
			"api.internal",
			"--domains",
			"a.internal,10.0.0.1",
			"--domains",
			"b.internal",
			"--timeout",
			"3",
			"--expire-at",
			"2030-05-06T07:08:09Z",
		])
		.unwrap();
		assert!(opts.verbose);
		let Command::Gen(GenCommand::SignedCert(args)) = opts.command else {
			panic!("expected gen signed-cert");
		};
		assert_eq!(args.common_name, "api.internal");
		assert_eq!(args.domains, vec!["a.internal", "10.0.0.1", "b.internal"]);
		assert_eq!(args.timeout, Duration::from_secs(3));
		assert_eq!(args.expire_at, datetime!(2030-05-06 07:08:09 UTC));
	}

	#[test]
	fn ca_cert_default_expiry() {
		let opts = parse(&[
			"gen",
			"ca-cert",
			"--ca-url",
			"https://v.example/certificates/my-ca",
			"--name",
			"my-ca",
		])
		.unwrap();
		let Command::Gen(GenCommand::CaCert(args)) = opts.command else {
			panic!("expected gen ca-cert");
		};
		let years = args.expire_at.year() - OffsetDateTime::now_utc().year();
		assert_eq!(years, 10);
	}

	#[test]
	fn invalid_expiry_rejected() {
		let res = parse(&[
			"gen",
			"ca-cert",
			"--ca-url",
			"https://v.example/certificates/my-ca",
			"--name",
			"my-ca",
			"--expire-at",
			"next tuesday",
		]);
		assert!(res.is_err());
	}

	#[test]
	fn out_dir_must_not_be_file() -> anyhow::Result<()> {
		use assert_fs::prelude::*;
		let temp = assert_fs::TempDir::new()?;
		let file = temp.child("file");
		file.touch()?;
		let res = parse(&[
			"download",
			"--url",
			"https://v.example/secrets/x",
			"--out-dir",
			file.path().to_str().unwrap(),
		]);
		assert!(res.is_err());
		Ok(())
	}

	#[test]
	fn zero_timeout_rejected() {
		let res = parse(&["download", "--url", "https://v.example/secrets/x", "--timeout", "0"]);
		assert!(res.is_err());
	}
}
