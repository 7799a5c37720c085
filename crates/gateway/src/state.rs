use std::{path::PathBuf, sync::Arc};

use {
    parley_campaigns::{CampaignService, DispatchSettings, Dispatcher, Reconciler},
    parley_config::ParleyConfig,
    parley_conversations::{InboundProcessor, OutboundGateway},
    parley_store::Store,
    parley_transport::MessageTransport,
    secrecy::Secret,
};

/// Where uploads are stored and how they are addressed.
#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub dir: PathBuf,
    pub max_bytes: usize,
    /// Prefix for returned upload URLs, without a trailing slash.
    pub public_base: String,
}

/// Everything handlers need, built once per process.
pub struct GatewayState {
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn MessageTransport>,
    pub outbound: OutboundGateway,
    pub inbound: InboundProcessor,
    pub reconciler: Reconciler,
    pub dispatcher: Arc<Dispatcher>,
    pub campaigns: CampaignService,
    pub api_key: Option<Secret<String>>,
    pub media: MediaSettings,
    pub version: &'static str,
}

impl GatewayState {
    pub fn new(
        config: &ParleyConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn MessageTransport>,
    ) -> Arc<Self> {
        let public_base = config.server.public_base();
        let status_callback = Some(
            config
                .transport
                .status_callback_url
                .clone()
                .unwrap_or_else(|| format!("{public_base}/webhooks/status")),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            DispatchSettings::from_config(&config.campaigns, status_callback.clone()),
        ));

        Arc::new(Self {
            outbound: OutboundGateway::new(Arc::clone(&store), Arc::clone(&transport))
                .with_status_callback(status_callback),
            inbound: InboundProcessor::new(Arc::clone(&store)),
            reconciler: Reconciler::new(Arc::clone(&store)),
            campaigns: CampaignService::new(Arc::clone(&store), Arc::clone(&dispatcher)),
            dispatcher,
            api_key: config
                .auth
                .is_enabled()
                .then(|| config.auth.api_key.clone())
                .flatten(),
            media: MediaSettings {
                dir: PathBuf::from(&config.media.upload_dir),
                max_bytes: config.media.max_upload_bytes,
                public_base,
            },
            store,
            transport,
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}
