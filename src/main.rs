use envoy_types::pb::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use grpc_payload_extproc::config::{Config, EnvConfig};
use grpc_payload_extproc::grpc_service::PayloadExtProcGrpcService;
use grpc_payload_extproc::health::HealthService;
use grpc_payload_extproc::policy::{default_rules, load_rules, MutationPolicy};
use grpc_payload_extproc::registry::MessageRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic_health::pb::health_server::HealthServer;
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        env: EnvConfig::new()?,
    };
    init_logging(config.env.debug);
    log::info!("Config initialized: {:?}", config.env);

    let registry = Arc::new(MessageRegistry::load(&config.env.descriptor_sets)?);
    let rules = match &config.env.rules_file {
        Some(path) => load_rules(path)?,
        None => default_rules(
            &config.env.request_message_type,
            &config.env.response_message_type,
        ),
    };
    let policy = Arc::new(MutationPolicy::new(registry, rules)?);
    log::info!("Loaded {} mutation rules", policy.rules().len());
    let grpc_service = PayloadExtProcGrpcService::new(&config, policy)?;

    let addr: SocketAddr = config.env.grpc_addr.parse()?;
    let mut builder = Server::builder();
    if let Some((cert, key)) = config.env.tls() {
        let cert = tokio::fs::read(cert).await?;
        let key = tokio::fs::read(key).await?;
        builder =
            builder.tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))?;
        log::info!("TLS enabled");
    }

    log::info!("Starting ext_proc gRPC server on {}", addr);
    builder
        .add_service(ExternalProcessorServer::new(grpc_service))
        .add_service(HealthServer::new(HealthService))
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
