use envconfig::Envconfig;
use kube::Client;
use tenant_operator::{config::OperatorConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube and reqwest both pull rustls; pin the provider before either builds a client
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(?e, "CryptoProvider already installed; proceeding");
    }

    let cfg = OperatorConfig::init_from_env()?;
    info!(?cfg, "starting tenant operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
