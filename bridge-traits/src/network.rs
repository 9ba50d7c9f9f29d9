//! Network Monitoring Abstraction
//!
//! Connectivity sensing is owned by the host; the core only asks whether the
//! current link is Wi-Fi before admitting a download.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    /// Unmetered, non-cellular link. Ethernet counts as Wi-Fi for admission.
    pub fn allows_wifi_only_transfers(&self) -> bool {
        self.status == NetworkStatus::Connected
            && matches!(
                self.network_type,
                Some(NetworkType::WiFi) | Some(NetworkType::Ethernet)
            )
            && !self.is_metered
    }
}

#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Check if connected via an unmetered Wi-Fi/Ethernet link
    async fn is_wifi(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.allows_wifi_only_transfers())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metered_wifi_is_not_wifi_only() {
        let info = NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::WiFi),
            is_metered: true,
        };
        assert!(!info.allows_wifi_only_transfers());
    }

    #[test]
    fn test_cellular_is_rejected() {
        let info = NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::Cellular),
            is_metered: false,
        };
        assert!(!info.allows_wifi_only_transfers());

        let ethernet = NetworkInfo {
            network_type: Some(NetworkType::Ethernet),
            ..info
        };
        assert!(ethernet.allows_wifi_only_transfers());
    }
}
