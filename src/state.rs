use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::services::AuthService;
use crate::config::AppConfig;
use crate::inspections::services::InspectionService;
use crate::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::payments::{
    gateway::{DisabledGateway, PaymentGateway},
    services::PaymentService,
    stripe::StripeGateway,
};
use crate::storage::{Storage, StorageClient};
use crate::store::{self, Store};
use crate::technicians::services::TechnicianDirectory;
use crate::users::services::AccountService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub auth: Arc<AuthService>,
    pub accounts: Arc<AccountService>,
    pub inspections: Arc<InspectionService>,
    pub payments: Arc<PaymentService>,
    pub technicians: Arc<TechnicianDirectory>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = store::connect(&config).await?;

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                warn!("SMTP_HOST not set; emails are only logged");
                Arc::new(LogMailer)
            }
        };

        let gateway: Arc<dyn PaymentGateway> = match &config.stripe {
            Some(stripe) => {
                info!(api_base = %stripe.api_base, "stripe payments enabled");
                Arc::new(StripeGateway::new(stripe)?)
            }
            None => {
                warn!("STRIPE_SECRET_KEY not set; payment endpoints will return 503");
                Arc::new(DisabledGateway)
            }
        };

        // Real S3/MinIO
        let storage = Arc::new(Storage::from_config(&config.minio).await?) as Arc<dyn StorageClient>;

        Ok(Self::from_parts(config, store, mailer, gateway, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        gateway: Arc<dyn PaymentGateway>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            auth: Arc::new(AuthService::new(store.clone(), mailer.clone(), &config)),
            accounts: Arc::new(AccountService::new(store.clone())),
            inspections: Arc::new(InspectionService::new(store.clone(), mailer)),
            payments: Arc::new(PaymentService::new(store.clone(), gateway, storage)),
            technicians: Arc::new(TechnicianDirectory::new(store.clone())),
            config,
            store,
        }
    }

    /// In-memory store, recording collaborators and fixed test keys.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, MinioConfig};
        use crate::mailer::testing::RecordingMailer;
        use crate::payments::gateway::testing::FakeGateway;
        use crate::storage::testing::FakeStorage;
        use crate::store::MemoryStore;

        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            stripe: None,
            minio: MinioConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
            },
            smtp: None,
            public_base_url: "http://localhost:8080".into(),
            require_email_verification: false,
            oauth_broker_secret: Some(crate::testing::BROKER_SECRET.into()),
        });

        Self::from_parts(
            config,
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingMailer::default()),
            Arc::new(FakeGateway::default()),
            Arc::new(FakeStorage::default()),
        )
    }
}
