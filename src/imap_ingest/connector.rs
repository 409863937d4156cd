//! IMAP connector: TCP + TLS + plain LOGIN, generalized from the teacher's
//! `imap::ImapClient` (same TLS/connect shape, XOAUTH2 swapped for LOGIN
//! since this system talks to one generic account by username/password).

use anyhow::{Context, Result};
use async_imap::{Client, Session};
use rustls_native_certs::load_native_certs;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::Config;

pub type ImapStream = Compat<tokio_rustls::client::TlsStream<TcpStream>>;

pub async fn connect(config: &Config) -> Result<Session<ImapStream>> {
    let mut root_store = RootCertStore::empty();
    for cert in load_native_certs().context("loading native root certs")? {
        root_store
            .add(&tokio_rustls::rustls::Certificate(cert.0))
            .context("adding cert to root store")?;
    }

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
        .await
        .with_context(|| format!("connecting to {}:{}", config.imap_host, config.imap_port))?;

    let server_name =
        ServerName::try_from(config.imap_host.as_str()).context("invalid IMAP hostname")?;
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .context("starting TLS for IMAP")?;

    let compat_stream = tls_stream.compat();
    let mut client = Client::new(compat_stream);
    client
        .read_response()
        .await
        .context("reading IMAP greeting")?
        .ok_or_else(|| anyhow::anyhow!("connection closed before greeting"))?;

    let session = client
        .login(&config.imap_user, &config.imap_pass)
        .await
        .map_err(|(e, _client)| e)
        .context("IMAP LOGIN")?;

    Ok(session)
}
