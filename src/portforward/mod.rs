//! Pod port-forwarding
//!
//! Binds a local TCP listener and bridges each accepted connection to a pod
//! port over the API server's websocket tunnel. Runs until the caller drops
//! the future (Ctrl-C at the CLI).

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::net::{TcpListener, TcpStream};

/// Forward 127.0.0.1:`local_port` to `pod`:`remote_port`
pub async fn forward(
    client: Client,
    namespace: &str,
    pod: &str,
    local_port: u16,
    remote_port: u16,
) -> Result<()> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let listener = TcpListener::bind(("127.0.0.1", local_port))
        .await
        .with_context(|| format!("Failed to bind 127.0.0.1:{}", local_port))?;
    tracing::info!(
        "Forwarding 127.0.0.1:{} to {}/{}:{}",
        local_port,
        namespace,
        pod,
        remote_port
    );

    loop {
        let (connection, peer) = listener.accept().await.context("Accept failed")?;
        tracing::debug!("New connection from {}", peer);
        let api = api.clone();
        let pod = pod.to_string();
        tokio::spawn(async move {
            if let Err(e) = forward_connection(&api, &pod, remote_port, connection).await {
                tracing::warn!("Connection to {}:{} ended: {:#}", pod, remote_port, e);
            }
        });
    }
}

async fn forward_connection(
    api: &Api<Pod>,
    pod: &str,
    port: u16,
    mut connection: TcpStream,
) -> Result<()> {
    let mut forwarder = api
        .portforward(pod, &[port])
        .await
        .with_context(|| format!("Failed to start port-forward to pod {}", pod))?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| anyhow::anyhow!("Port {} not available on the forwarder", port))?;
    tokio::io::copy_bidirectional(&mut connection, &mut upstream)
        .await
        .context("Forwarded connection failed")?;
    drop(upstream);
    forwarder.join().await.context("Port-forwarder failed")?;
    Ok(())
}
