//! # entityd-collector-host
//!
//! The `entityd.host` plugin: produces the `Host` entity for the machine
//! the agent runs on. One update per cycle, identified by the host's
//! fully qualified name, carrying uptime, boot time and load averages
//! read from `/proc`. Probes that fail simply leave their attributes out;
//! a host entity with fewer attributes beats no host entity at all.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::warn;

use entityd_core::{EntityUpdate, traits};
use entityd_framework::{
    AttrFilter, Config, ConfigureHook, FindEntityHook, HookBinding, HookError, HookPoint,
    HookResult, Plugin,
};

/// The `Host` entity producer.
pub struct HostPlugin;

impl HostPlugin {
    pub fn new() -> Self {
        HostPlugin
    }

    /// Builds the update describing this host.
    fn host_update(&self) -> EntityUpdate {
        let mut update = EntityUpdate::new("Host");

        let fqdn = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|err| {
                warn!(error = %err, "cannot read hostname");
                "localhost".to_string()
            });
        update
            .attrs
            .set("fqdn", fqdn.as_str(), &[traits::ENTITY_ID, traits::INDEX]);
        update.attrs.set("hostname", fqdn.as_str(), &[traits::INDEX]);
        update.set_label(fqdn);

        if let Ok(text) = std::fs::read_to_string("/proc/uptime")
            && let Some(uptime) = parse_uptime(&text)
        {
            update.attrs.set(
                "uptime",
                uptime as i64,
                &[traits::METRIC_COUNTER, traits::TIME_DURATION, traits::UNIT_SECONDS],
            );
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            update.attrs.set(
                "boottime",
                now - uptime,
                &[traits::METRIC_GAUGE, traits::UNIT_SECONDS],
            );
        }

        if let Ok(text) = std::fs::read_to_string("/proc/loadavg")
            && let Some((one, five, fifteen)) = parse_loadavg(&text)
        {
            update.attrs.set("loadavg_1", one, &[traits::METRIC_GAUGE]);
            update.attrs.set("loadavg_5", five, &[traits::METRIC_GAUGE]);
            update.attrs.set("loadavg_15", fifteen, &[traits::METRIC_GAUGE]);
        }

        update
    }
}

impl Default for HostPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// First field of `/proc/uptime`: seconds since boot.
fn parse_uptime(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// First three fields of `/proc/loadavg`.
fn parse_loadavg(text: &str) -> Option<(f64, f64, f64)> {
    let mut fields = text.split_whitespace();
    let one = fields.next()?.parse().ok()?;
    let five = fields.next()?.parse().ok()?;
    let fifteen = fields.next()?.parse().ok()?;
    Some((one, five, fifteen))
}

#[async_trait]
impl ConfigureHook for HostPlugin {
    async fn configure(&self, config: &Arc<Config>) -> HookResult<()> {
        config
            .addentity("Host", "entityd.host")
            .map_err(HookError::new)
    }
}

#[async_trait]
impl FindEntityHook for HostPlugin {
    async fn find_entity(
        &self,
        name: &str,
        attrs: Option<&AttrFilter>,
        _include_ondemand: bool,
    ) -> HookResult<Option<Vec<EntityUpdate>>> {
        if name != "Host" {
            return Ok(None);
        }
        if attrs.is_some() {
            return Err(HookError::new("attribute based filtering not supported"));
        }
        Ok(Some(vec![self.host_update()]))
    }
}

impl Plugin for HostPlugin {
    fn name(&self) -> &str {
        "entityd.host"
    }

    fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
        vec![
            HookBinding::new(HookPoint::Configure(self.clone())),
            HookBinding::new(HookPoint::FindEntity(self.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_one_identified_host() {
        let plugin = HostPlugin::new();
        let batch = plugin.find_entity("Host", None, false).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);

        let host = &batch[0];
        assert_eq!(host.etype(), "Host");
        let fqdn = host.attrs.get("fqdn").unwrap();
        assert!(fqdn.has_trait(traits::ENTITY_ID));
        assert_eq!(host.label(), Some(fqdn.value().canonical_text().as_str()));

        // Two observations of the same host share an identity.
        let again = plugin.find_entity("Host", None, false).await.unwrap().unwrap();
        assert_eq!(host.ueid(), again[0].ueid());
    }

    #[tokio::test]
    async fn other_types_are_not_handled() {
        let plugin = HostPlugin::new();
        assert!(plugin.find_entity("Process", None, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attribute_filters_are_rejected() {
        let plugin = HostPlugin::new();
        let filter = AttrFilter::new();
        assert!(plugin.find_entity("Host", Some(&filter), false).await.is_err());
    }

    #[test]
    fn proc_parsers() {
        assert_eq!(parse_uptime("12345.67 99999.99\n"), Some(12345.67));
        assert_eq!(parse_uptime("garbage"), None);

        assert_eq!(
            parse_loadavg("0.25 0.50 0.75 2/345 6789\n"),
            Some((0.25, 0.5, 0.75))
        );
        assert_eq!(parse_loadavg(""), None);
    }
}
