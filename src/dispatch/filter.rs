//! Platform filtering.

use crate::push::{Platform, PushNotification};

/// Which platforms are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformToggles {
    pub ios: bool,
    pub android: bool,
    pub huawei: bool,
}

impl PlatformToggles {
    /// Every platform enabled.
    #[must_use]
    pub fn all() -> Self {
        Self {
            ios: true,
            android: true,
            huawei: true,
        }
    }

    #[must_use]
    pub fn is_enabled(&self, platform: Platform) -> bool {
        match platform {
            Platform::Ios => self.ios,
            Platform::Android => self.android,
            Platform::Huawei => self.huawei,
        }
    }
}

impl Default for PlatformToggles {
    fn default() -> Self {
        Self::all()
    }
}

/// Keep notifications whose platform is enabled, in their original order.
#[must_use]
pub fn filter_enabled(
    notifications: Vec<PushNotification>,
    toggles: &PlatformToggles,
) -> Vec<PushNotification> {
    notifications
        .into_iter()
        .filter(|n| toggles.is_enabled(n.platform))
        .collect()
}
