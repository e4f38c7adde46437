use std::collections::HashMap;

use crate::models::PushSubscription;
use crate::schedule::AlertKey;
use crate::scheduler::{ArmedTimer, FiredAlert};

/// <alert_key, armed timer>
pub type ArmedMap = HashMap<AlertKey, ArmedTimer>;

/// <endpoint, subscription>
pub type SubscriptionMap = HashMap<String, PushSubscription>;

/// <alert_key, last fired instant>
pub type FiredMap = HashMap<AlertKey, FiredAlert>;
