use std::time::Duration;

use crate::{
    resolver::{EnvLookup, ProcessEnv},
    telemetry::NoopTelemetrySink,
    ConfigClient, ConfigElement, Context, ContextSet, TelemetrySink,
};

/// Configuration for [`ConfigClient`].
pub struct ClientConfig<'a> {
    pub(crate) namespace: Option<String>,
    pub(crate) global_context: ContextSet,
    pub(crate) bundled_defaults: Vec<ConfigElement>,
    pub(crate) local_overrides: Vec<ConfigElement>,
    pub(crate) env_lookup: Box<dyn EnvLookup + Send + Sync + 'a>,
    pub(crate) telemetry_sink: Box<dyn TelemetrySink + Send + Sync + 'a>,
    pub(crate) initialization_timeout: Duration,
}

impl<'a> ClientConfig<'a> {
    /// Default time [`ConfigClient::wait_for_initialization`] waits for the first snapshot.
    pub const DEFAULT_INITIALIZATION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a default configuration: no namespace, no static layers, process environment for
    /// indirect references and no telemetry.
    ///
    /// ```
    /// # use prefab::ClientConfig;
    /// ClientConfig::new();
    /// ```
    pub fn new() -> Self {
        ClientConfig {
            namespace: None,
            global_context: ContextSet::new(),
            bundled_defaults: Vec::new(),
            local_overrides: Vec::new(),
            env_lookup: Box::new(ProcessEnv),
            telemetry_sink: Box::new(NoopTelemetrySink),
            initialization_timeout: Self::DEFAULT_INITIALIZATION_TIMEOUT,
        }
    }

    /// Dotted namespace of this process, visible to rules as the `NAMESPACE` property.
    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a context that applies to every resolution for the lifetime of the client.
    ///
    /// ```
    /// # use prefab::{ClientConfig, Context};
    /// let mut config = ClientConfig::new();
    /// config.global_context(Context::new("host").with("region", "eu-west-1"));
    /// ```
    pub fn global_context(&mut self, context: Context) -> &mut Self {
        self.global_context.insert(context);
        self
    }

    /// Configs shipped with the application. Lowest precedence.
    pub fn bundled_defaults(
        &mut self,
        elements: impl IntoIterator<Item = ConfigElement>,
    ) -> &mut Self {
        self.bundled_defaults.extend(elements);
        self
    }

    /// Configs overriding everything the server delivers. Highest precedence.
    pub fn local_overrides(
        &mut self,
        elements: impl IntoIterator<Item = ConfigElement>,
    ) -> &mut Self {
        self.local_overrides.extend(elements);
        self
    }

    /// Source of environment variables for indirect references. Defaults to the process
    /// environment.
    ///
    /// ```
    /// # use prefab::ClientConfig;
    /// let mut config = ClientConfig::new();
    /// config.env_lookup(|name: &str| (name == "PORT").then(|| "8080".to_owned()));
    /// ```
    pub fn env_lookup(&mut self, env_lookup: impl EnvLookup + Send + Sync + 'a) -> &mut Self {
        self.env_lookup = Box::new(env_lookup);
        self
    }

    /// Set a sink receiving every tracked resolution.
    ///
    /// ```
    /// # use prefab::ClientConfig;
    /// let mut config = ClientConfig::new();
    /// config.telemetry_sink(|m: &prefab::Match| {
    ///     println!("{} -> {:?}", m.key(), m.value);
    /// });
    /// ```
    pub fn telemetry_sink(
        &mut self,
        telemetry_sink: impl TelemetrySink + Send + Sync + 'a,
    ) -> &mut Self {
        self.telemetry_sink = Box::new(telemetry_sink);
        self
    }

    /// How long [`ConfigClient::wait_for_initialization`] blocks before giving up.
    pub fn initialization_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.initialization_timeout = timeout;
        self
    }

    /// Create a new [`ConfigClient`] using this configuration.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use prefab::{ClientConfig, ConfigClient};
    /// let mut config = ClientConfig::new();
    /// config.namespace("billing").initialization_timeout(Duration::from_secs(5));
    /// let client: ConfigClient = config.to_client();
    /// ```
    pub fn to_client(self) -> ConfigClient<'a> {
        ConfigClient::new(self)
    }
}

impl<'a> Default for ClientConfig<'a> {
    fn default() -> Self {
        ClientConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;

    #[test]
    fn setters_chain_on_a_borrowed_config() {
        let mut config = ClientConfig::new();
        config
            .namespace("billing")
            .initialization_timeout(Duration::from_millis(5));

        assert_eq!(config.namespace.as_deref(), Some("billing"));
        assert_eq!(config.initialization_timeout, Duration::from_millis(5));
    }
}
