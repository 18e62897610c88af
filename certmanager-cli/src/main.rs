use anyhow::Result;
use certmanager::{CertManager, CredentialChain};
use tracing_subscriber::EnvFilter;

use crate::args::{Command, GenCommand};

mod args;
mod commands;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	let opts = args::options().run();
	init_tracing(opts.verbose);

	let manager = CertManager::key_vault(CredentialChain::default());
	match &opts.command {
		Command::Download(args) => commands::download(&manager, args).await,
		Command::Gen(GenCommand::CaCert(args)) => commands::gen_ca_cert(&manager, args).await,
		Command::Gen(GenCommand::SignedCert(args)) => {
			commands::gen_signed_cert(&manager, args).await
		},
	}
}

fn init_tracing(verbose: bool) {
	let level = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}
