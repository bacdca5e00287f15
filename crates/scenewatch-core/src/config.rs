//! 엔진 설정 구조체.
//!
//! 폴링 주기와 OCR 데이터 경로 등 런타임 설정을 정의한다.
//! 매칭 파라미터 자체(패턴/객체/OCR)는 호스트 설정 객체에 중첩 저장되며
//! `scenewatch-vision`의 파라미터 래퍼가 로드한다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 폴링 주기 (밀리초)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Tesseract 데이터 경로 (None이면 시스템 기본값)
    #[serde(default)]
    pub tessdata_path: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            tessdata_path: None,
        }
    }
}

impl EngineConfig {
    /// 폴링 주기를 `Duration`으로 반환
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 호스트 설정 객체에서 로드. 키가 없으면 기본값.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        match value.get("engineConfig") {
            Some(obj) => Ok(serde_json::from_value(obj.clone())?),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_missing_key_uses_defaults() {
        let value = serde_json::json!({});
        let config = EngineConfig::from_value(&value).unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[test]
    fn from_value_reads_nested_object() {
        let value = serde_json::json!({
            "engineConfig": { "pollIntervalMs": 250 }
        });
        // camelCase 키는 지원하지 않음 — snake_case 필드명 그대로 저장된다
        let config = EngineConfig::from_value(&value).unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);

        let value = serde_json::json!({
            "engineConfig": { "poll_interval_ms": 250 }
        });
        let config = EngineConfig::from_value(&value).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
    }
}
