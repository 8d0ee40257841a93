//! Microphone permission

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Microphone access state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
}

/// Platform permission capability
#[async_trait]
pub trait MicrophonePermission: Send + Sync {
    /// Current status, without prompting
    async fn status(&self) -> PermissionStatus;

    /// Ask for access; resolves with the resulting status
    async fn request(&self) -> PermissionStatus;
}

/// Permission derived from whether the default input device can be opened
///
/// Desktop hosts have no prompt; an input device whose configurations cannot be queried
/// is treated as access denied (sandboxed or revoked).
pub struct DevicePermission;

impl DevicePermission {
    fn check_device() -> PermissionStatus {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            // Absence of a device is reported by the recognizer as unsupported
            return PermissionStatus::Granted;
        };

        match device.supported_input_configs() {
            Ok(_) => PermissionStatus::Granted,
            Err(e) => {
                tracing::warn!(error = %e, "input device refused configuration query");
                PermissionStatus::Denied
            }
        }
    }
}

#[async_trait]
impl MicrophonePermission for DevicePermission {
    async fn status(&self) -> PermissionStatus {
        tokio::task::spawn_blocking(Self::check_device)
            .await
            .unwrap_or(PermissionStatus::Prompt)
    }

    async fn request(&self) -> PermissionStatus {
        match self.status().await {
            PermissionStatus::Prompt => PermissionStatus::Denied,
            status => status,
        }
    }
}

/// Fixed permission, for text-only operation
pub struct StaticPermission(pub PermissionStatus);

#[async_trait]
impl MicrophonePermission for StaticPermission {
    async fn status(&self) -> PermissionStatus {
        self.0
    }

    async fn request(&self) -> PermissionStatus {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&PermissionStatus::Prompt).unwrap();
        assert_eq!(json, "\"prompt\"");
    }

    #[tokio::test]
    async fn test_static_permission() {
        let permission = StaticPermission(PermissionStatus::Denied);
        assert_eq!(permission.status().await, PermissionStatus::Denied);
        assert_eq!(permission.request().await, PermissionStatus::Denied);
    }
}
