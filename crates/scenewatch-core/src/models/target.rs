//! 캡처 대상 모델.
//!
//! 설정된 대상 기술자(메인 출력 / 소스 / 장면)를 표현한다. 프레임
//! 데이터는 소유하지 않으며, 소스/장면은 약참조로만 쥔다 — 하부 장치가
//! 사라지면 대상은 무효가 된다.

use std::sync::{Arc, Weak};

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::ports::capture::{FrameSource, VideoHost};

/// 프레임 소스 약참조.
///
/// 소스가 파괴되면 업그레이드가 실패하며, 이는 오류가 아니라 무효
/// 대상으로 취급된다.
#[derive(Debug, Clone, Default)]
pub struct WeakSourceRef(Option<Weak<dyn FrameSource>>);

impl WeakSourceRef {
    /// 살아있는 소스에서 약참조 생성
    pub fn new(source: &Arc<dyn FrameSource>) -> Self {
        Self(Some(Arc::downgrade(source)))
    }

    /// 아무것도 가리키지 않는 약참조
    pub fn empty() -> Self {
        Self(None)
    }

    fn from_lookup(source: Option<Arc<dyn FrameSource>>) -> Self {
        match source {
            Some(s) => Self::new(&s),
            None => Self::empty(),
        }
    }

    /// 강참조 획득 시도. 소스가 사라졌으면 None.
    pub fn upgrade(&self) -> Option<Arc<dyn FrameSource>> {
        self.0.as_ref()?.upgrade()
    }

    pub fn is_valid(&self) -> bool {
        self.upgrade().is_some()
    }
}

/// 대상 종류 저장 코드
const TYPE_MAIN_OUTPUT: i64 = 0;
const TYPE_SOURCE: i64 = 1;
const TYPE_SCENE: i64 = 2;

/// 구버전 평면 키의 대상 종류 코드
const LEGACY_TYPE_SOURCE: i64 = 0;

/// 캡처 대상 기술자.
///
/// 캡처를 시도하기 전에 `is_valid()`가 성립해야 하며, 무효 대상은
/// 즉시 실패한다.
#[derive(Debug, Clone)]
pub enum VideoTarget {
    /// 프로그램/메인 출력
    MainOutput,
    /// 명시적 캡처 소스 (약참조)
    Source { name: String, source: WeakSourceRef },
    /// 장면 (약참조)
    Scene { name: String, scene: WeakSourceRef },
}

impl Default for VideoTarget {
    fn default() -> Self {
        VideoTarget::MainOutput
    }
}

impl VideoTarget {
    /// 캡처 시도 전 성립해야 하는 유효성 검사
    pub fn is_valid(&self) -> bool {
        match self {
            VideoTarget::MainOutput => true,
            VideoTarget::Source { source, .. } => source.is_valid(),
            VideoTarget::Scene { scene, .. } => scene.is_valid(),
        }
    }

    /// 대상이 직접 쥔 캡처 핸들.
    ///
    /// 메인 출력은 호스트가 해석하므로 None을 반환한다. 약참조가 죽은
    /// 경우에도 실패 대신 None.
    pub fn video(&self) -> Option<Arc<dyn FrameSource>> {
        match self {
            VideoTarget::MainOutput => None,
            VideoTarget::Source { source, .. } => source.upgrade(),
            VideoTarget::Scene { scene, .. } => scene.upgrade(),
        }
    }

    /// 표시용 라벨
    pub fn label(&self) -> &str {
        match self {
            VideoTarget::MainOutput => "메인 출력",
            VideoTarget::Source { name, .. } => name,
            VideoTarget::Scene { name, .. } => name,
        }
    }

    /// 현재 형식으로 저장 — `videoInputData` 중첩 객체
    pub fn save(&self, obj: &mut Map<String, Value>) {
        let (type_code, source_name, scene_name) = match self {
            VideoTarget::MainOutput => (TYPE_MAIN_OUTPUT, "", ""),
            VideoTarget::Source { name, .. } => (TYPE_SOURCE, name.as_str(), ""),
            VideoTarget::Scene { name, .. } => (TYPE_SCENE, "", name.as_str()),
        };
        obj.insert(
            "videoInputData".to_string(),
            json!({
                "type": type_code,
                "source": source_name,
                "scene": scene_name,
            }),
        );
    }

    /// 이중 경로 로드.
    ///
    /// 구버전 평면 키(`videoType` + `video`)가 있으면 그 형식으로 읽고,
    /// 아니면 `videoInputData` 중첩 객체를 읽는다. 이름 해석은 호스트
    /// 조회를 거치며, 찾지 못한 소스는 무효 약참조가 된다.
    pub fn load(obj: &Value, host: &dyn VideoHost) -> Self {
        // TODO: 구버전 평면 키 fallback은 추후 버전에서 제거
        if let Some(legacy_type) = obj.get("videoType").and_then(Value::as_i64) {
            if legacy_type == LEGACY_TYPE_SOURCE {
                let name = obj
                    .get("video")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let source = WeakSourceRef::from_lookup(host.find_source(&name));
                return VideoTarget::Source { name, source };
            }
            return VideoTarget::MainOutput;
        }

        let data = obj.get("videoInputData").cloned().unwrap_or(Value::Null);
        let type_code = data
            .get("type")
            .and_then(Value::as_i64)
            .unwrap_or(TYPE_MAIN_OUTPUT);
        match type_code {
            TYPE_SOURCE => {
                let name = data
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let source = WeakSourceRef::from_lookup(host.find_source(&name));
                VideoTarget::Source { name, source }
            }
            TYPE_SCENE => {
                let name = data
                    .get("scene")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let scene = WeakSourceRef::from_lookup(host.find_scene(&name));
                VideoTarget::Scene { name, scene }
            }
            TYPE_MAIN_OUTPUT => VideoTarget::MainOutput,
            other => {
                warn!(code = other, "알 수 없는 캡처 대상 종류, 메인 출력으로 대체");
                VideoTarget::MainOutput
            }
        }
    }
}
