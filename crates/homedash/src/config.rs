//! CLI-aware configuration: the config file plus `--hub` / `--token`
//! overrides, turned into everything a command needs.

use std::sync::Arc;

use secrecy::SecretString;

use homedash_config::{Config, DashboardConfig, load_config, load_dashboard};
use homedash_core::{Controller, CoreError, CredentialStore, HubConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub struct Context {
    pub hub: HubConfig,
    pub credentials: Arc<dyn CredentialStore>,
    pub dashboard: DashboardConfig,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let mut config: Config = load_config(global.config.as_deref())?;
        if let Some(ref hub) = global.hub {
            config.hub.url = Some(hub.clone());
        }

        let mut hub = config.to_hub_config()?;
        if let Some(ref token) = global.token {
            hub.access_token = Some(SecretString::from(token.clone()));
        }

        let dashboard_path = config.dashboard_path();
        Ok(Self {
            hub,
            credentials: config.credential_store(),
            dashboard: load_dashboard(Some(&dashboard_path)),
        })
    }

    pub fn controller(&self) -> Controller {
        Controller::new(self.hub.clone(), Arc::clone(&self.credentials))
    }

    /// Connect, run `f`, disconnect.
    pub async fn oneshot<F, Fut, T>(&self, f: F) -> Result<T, CliError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        Ok(Controller::oneshot(self.hub.clone(), Arc::clone(&self.credentials), f).await?)
    }

    /// Controller whose entity feed only carries the dashboard's entities.
    pub fn dashboard_controller(&self) -> Controller {
        let mut hub = self.hub.clone();
        hub.entity_filter = Some(self.dashboard.entity_ids());
        Controller::new(hub, Arc::clone(&self.credentials))
    }
}
