// src/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OtaError;

/// Client-supplied device identifier. Only emptiness is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, OtaError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(OtaError::invalid("device id required"));
        }
        Ok(Self(raw))
    }

    /// Reads the optional `device` query parameter; empty counts as absent.
    pub fn from_query(q: &DeviceQuery) -> Option<Self> {
        q.device.as_deref().and_then(|d| Self::parse(d).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
pub struct DeviceQuery { pub device: Option<String> }

#[derive(Deserialize)]
pub struct UpdateLinkReq { pub url: Option<String> }

#[derive(Serialize)]
pub struct OnlineRes { pub online: bool }

#[derive(Serialize)]
pub struct MessageRes { pub message: String }

#[derive(Serialize, Debug, PartialEq)]
pub struct TriggerRes {
    pub update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateView {
    pub update: bool,
    pub firmware_url: String,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub armed_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device: String,
    pub last_seen_at: String,
    pub online: bool,
}
