//! 매칭 파라미터 래퍼.
//!
//! 각 파라미터 그룹은 호스트 설정 객체에 이름 있는 중첩 객체로
//! 저장된다. 로더는 먼저 현행 중첩 키를 확인하고, 없으면 열거된
//! 구버전 평면 키를 읽어 동등한 값을 합성한다 — 두 경로 모두 동일한
//! 정규화 규칙을 적용한다.

use image::RgbaImage;
use serde_json::{json, Map, Value};
use tracing::warn;

use scenewatch_core::models::frame::Region;

use crate::pattern::MatchMode;

/// `minNeighbors` 유효 범위 하한
pub const MIN_NEIGHBORS: u32 = 3;
/// `minNeighbors` 유효 범위 상한
pub const MAX_NEIGHBORS: u32 = 6;

// ============================================================
// 패턴 매칭 파라미터
// ============================================================

/// 패턴 매칭 파라미터
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatchParameters {
    /// 상관 표면 이진화 임계값 — [0, 1] 밖 저장값은 로드 시 클램프
    pub threshold: f32,
    /// 알파 0인 패턴 픽셀을 비교에서 제외할지
    pub use_alpha_as_mask: bool,
    /// 상관 점수 계산 방식
    pub match_mode: MatchMode,
    /// 변경 감지 검사에 패턴을 쓸지 (외부 매크로 엔진이 소비)
    pub use_for_changed_check: bool,
}

impl Default for PatternMatchParameters {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            use_alpha_as_mask: false,
            match_mode: MatchMode::default(),
            use_for_changed_check: false,
        }
    }
}

/// 임계값을 [0, 1]로 클램프 — 두 로드 경로 모두 동일하게 적용
fn clamp_threshold(raw: f64) -> f32 {
    if !(0.0..=1.0).contains(&raw) {
        warn!(threshold = raw, "패턴 임계값 범위 밖, [0, 1]로 클램프");
    }
    raw.clamp(0.0, 1.0) as f32
}

impl PatternMatchParameters {
    /// 현행 형식으로 저장 — `patternMatchData` 중첩 객체
    pub fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert(
            "patternMatchData".to_string(),
            json!({
                "useForChangedCheck": self.use_for_changed_check,
                "threshold": self.threshold,
                "useAlphaAsMask": self.use_alpha_as_mask,
                "matchMode": self.match_mode.code(),
            }),
        );
    }

    /// 이중 경로 로드
    pub fn load(obj: &Value) -> Self {
        // TODO: 구버전 평면 키 fallback은 추후 버전에서 제거
        let Some(data) = obj.get("patternMatchData") else {
            return Self {
                use_for_changed_check: obj
                    .get("usePatternForChangedCheck")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                threshold: clamp_threshold(
                    obj.get("threshold").and_then(Value::as_f64).unwrap_or(0.8),
                ),
                use_alpha_as_mask: obj
                    .get("useAlphaAsMask")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                match_mode: MatchMode::default(),
            };
        };

        let match_mode = match data.get("matchMode").and_then(Value::as_i64) {
            Some(code) => MatchMode::from_code(code),
            None => MatchMode::default(),
        };
        Self {
            use_for_changed_check: data
                .get("useForChangedCheck")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            threshold: clamp_threshold(
                data.get("threshold").and_then(Value::as_f64).unwrap_or(0.8),
            ),
            use_alpha_as_mask: data
                .get("useAlphaAsMask")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            match_mode,
        }
    }
}

// ============================================================
// 객체 검출 파라미터
// ============================================================

/// 검출 창 크기 경계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeParameter {
    pub width: u32,
    pub height: u32,
}

impl SizeParameter {
    /// (0, 0)은 "경계 없음"
    pub fn is_unbounded(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    fn save(&self) -> Value {
        json!({ "width": self.width, "height": self.height })
    }

    fn load(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        Self {
            width: value.get("width").and_then(Value::as_u64).unwrap_or(0) as u32,
            height: value.get("height").and_then(Value::as_u64).unwrap_or(0) as u32,
        }
    }
}

fn is_scale_factor_valid(scale_factor: f64) -> bool {
    scale_factor > 1.0
}

fn is_min_neighbors_valid(min_neighbors: i64) -> bool {
    min_neighbors >= MIN_NEIGHBORS as i64 && min_neighbors <= MAX_NEIGHBORS as i64
}

/// 객체 검출 파라미터
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetectParameters {
    /// 캐스케이드 모델 파일 경로
    pub model_path: String,
    /// 옥타브당 스케일 증가율 — 1.0 이하는 1.1로 정규화
    pub scale_factor: f64,
    /// 검출 확정에 필요한 중첩 검출 수 — 범위 밖은 하한으로 정규화
    pub min_neighbors: u32,
    /// 검출 창 최소 크기
    pub min_size: SizeParameter,
    /// 검출 창 최대 크기 ((0, 0)이면 무제한)
    pub max_size: SizeParameter,
}

impl Default for ObjectDetectParameters {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            scale_factor: 1.1,
            min_neighbors: MIN_NEIGHBORS,
            min_size: SizeParameter::default(),
            max_size: SizeParameter::default(),
        }
    }
}

impl ObjectDetectParameters {
    /// 정규화된 스케일 증가율 — 직접 구성된 값도 검출 시점에 보정된다
    pub fn effective_scale_factor(&self) -> f64 {
        if is_scale_factor_valid(self.scale_factor) {
            self.scale_factor
        } else {
            1.1
        }
    }

    /// 현행 형식으로 저장 — `objectMatchData` 중첩 객체
    pub fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert(
            "objectMatchData".to_string(),
            json!({
                "modelPath": self.model_path,
                "scaleFactor": self.scale_factor,
                "minNeighbors": self.min_neighbors,
                "minSize": self.min_size.save(),
                "maxSize": self.max_size.save(),
            }),
        );
    }

    /// 이중 경로 로드. 두 경로 모두 scaleFactor/minNeighbors를 정규화한다.
    pub fn load(obj: &Value) -> Self {
        // TODO: 구버전 평면 키 fallback은 추후 버전에서 제거
        let Some(data) = obj.get("objectMatchData") else {
            return Self::from_fields(
                obj.get("modelDataPath").and_then(Value::as_str),
                obj.get("scaleFactor").and_then(Value::as_f64),
                obj.get("minNeighbors").and_then(Value::as_i64),
                obj.get("minSize"),
                obj.get("maxSize"),
            );
        };
        Self::from_fields(
            data.get("modelPath").and_then(Value::as_str),
            data.get("scaleFactor").and_then(Value::as_f64),
            data.get("minNeighbors").and_then(Value::as_i64),
            data.get("minSize"),
            data.get("maxSize"),
        )
    }

    fn from_fields(
        model_path: Option<&str>,
        scale_factor: Option<f64>,
        min_neighbors: Option<i64>,
        min_size: Option<&Value>,
        max_size: Option<&Value>,
    ) -> Self {
        let mut scale_factor = scale_factor.unwrap_or(1.1);
        if !is_scale_factor_valid(scale_factor) {
            warn!(scale_factor, "scaleFactor 무효, 1.1로 정규화");
            scale_factor = 1.1;
        }
        let raw_neighbors = min_neighbors.unwrap_or(MIN_NEIGHBORS as i64);
        let min_neighbors = if is_min_neighbors_valid(raw_neighbors) {
            raw_neighbors as u32
        } else {
            warn!(
                min_neighbors = raw_neighbors,
                "minNeighbors 범위 밖, 하한으로 정규화"
            );
            MIN_NEIGHBORS
        };
        Self {
            model_path: model_path.unwrap_or_default().to_string(),
            scale_factor,
            min_neighbors,
            min_size: SizeParameter::load(min_size),
            max_size: SizeParameter::load(max_size),
        }
    }
}

// ============================================================
// 검사 영역 파라미터
// ============================================================

/// 검사 영역 파라미터 — 활성화 시 프레임을 영역으로 잘라 평가한다
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaParameters {
    pub enabled: bool,
    pub area: Region,
}

impl AreaParameters {
    /// 현행 형식으로 저장 — `areaData` 중첩 객체
    pub fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert(
            "areaData".to_string(),
            json!({
                "enabled": self.enabled,
                "area": {
                    "x": self.area.x,
                    "y": self.area.y,
                    "w": self.area.w,
                    "h": self.area.h,
                },
            }),
        );
    }

    /// 이중 경로 로드
    pub fn load(obj: &Value) -> Self {
        // TODO: 구버전 평면 키 fallback은 추후 버전에서 제거
        let (enabled, area) = match obj.get("areaData") {
            Some(data) => (
                data.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                load_region(data.get("area")),
            ),
            None => (
                obj.get("checkAreaEnabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                load_region(obj.get("checkArea")),
            ),
        };
        Self { enabled, area }
    }

    /// 활성화되어 있으면 프레임을 영역으로 잘라 반환. 비활성/빈 영역은 None.
    ///
    /// 영역은 프레임 경계로 클램프된다.
    pub fn crop(&self, frame: &RgbaImage) -> Option<RgbaImage> {
        if !self.enabled || self.area.is_empty() {
            return None;
        }
        let (fw, fh) = (frame.width(), frame.height());
        if self.area.x >= fw || self.area.y >= fh {
            return None;
        }
        let w = self.area.w.min(fw - self.area.x);
        let h = self.area.h.min(fh - self.area.y);
        Some(image::imageops::crop_imm(frame, self.area.x, self.area.y, w, h).to_image())
    }
}

fn load_region(value: Option<&Value>) -> Region {
    let Some(value) = value else {
        return Region::default();
    };
    Region {
        x: value.get("x").and_then(Value::as_u64).unwrap_or(0) as u32,
        y: value.get("y").and_then(Value::as_u64).unwrap_or(0) as u32,
        w: value.get("w").and_then(Value::as_u64).unwrap_or(0) as u32,
        h: value.get("h").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn pattern_threshold_clamped_on_namespaced_path() {
        let obj = json!({ "patternMatchData": { "threshold": 1.5 } });
        assert_eq!(PatternMatchParameters::load(&obj).threshold, 1.0);

        let obj = json!({ "patternMatchData": { "threshold": -0.2 } });
        assert_eq!(PatternMatchParameters::load(&obj).threshold, 0.0);
    }

    #[test]
    fn pattern_threshold_clamped_on_legacy_path() {
        // 구버전 경로도 동일한 정규화 — 검증 대칭 유지
        let obj = json!({ "threshold": 2.5, "useAlphaAsMask": true });
        let params = PatternMatchParameters::load(&obj);
        assert_eq!(params.threshold, 1.0);
        assert!(params.use_alpha_as_mask);
    }

    #[test]
    fn pattern_legacy_and_namespaced_loads_are_equivalent() {
        let legacy = json!({
            "usePatternForChangedCheck": true,
            "threshold": 0.75,
            "useAlphaAsMask": true,
        });
        let namespaced = json!({
            "patternMatchData": {
                "useForChangedCheck": true,
                "threshold": 0.75,
                "useAlphaAsMask": true,
            }
        });
        assert_eq!(
            PatternMatchParameters::load(&legacy),
            PatternMatchParameters::load(&namespaced)
        );
    }

    #[test]
    fn pattern_missing_match_mode_defaults_to_correlation() {
        let obj = json!({ "patternMatchData": { "threshold": 0.8 } });
        let params = PatternMatchParameters::load(&obj);
        assert_eq!(params.match_mode, MatchMode::CorrelationNormed);
    }

    #[test]
    fn pattern_save_load_roundtrip() {
        let params = PatternMatchParameters {
            threshold: 0.65,
            use_alpha_as_mask: true,
            match_mode: MatchMode::CorrelationCoeffNormed,
            use_for_changed_check: true,
        };
        let mut obj = Map::new();
        params.save(&mut obj);
        let loaded = PatternMatchParameters::load(&Value::Object(obj));
        // f32 → JSON(f64) → f32 왕복이므로 임계값은 근사 비교
        assert!((loaded.threshold - params.threshold).abs() < 1e-6);
        assert_eq!(loaded.use_alpha_as_mask, params.use_alpha_as_mask);
        assert_eq!(loaded.match_mode, params.match_mode);
        assert_eq!(loaded.use_for_changed_check, params.use_for_changed_check);
    }

    #[test]
    fn object_invalid_scale_factor_normalized() {
        let obj = json!({ "objectMatchData": { "scaleFactor": 1.0 } });
        assert_eq!(ObjectDetectParameters::load(&obj).scale_factor, 1.1);

        let obj = json!({ "objectMatchData": { "scaleFactor": 0.5 } });
        assert_eq!(ObjectDetectParameters::load(&obj).scale_factor, 1.1);
    }

    #[test]
    fn object_out_of_range_min_neighbors_normalized_to_min() {
        let obj = json!({ "objectMatchData": { "minNeighbors": 0 } });
        assert_eq!(ObjectDetectParameters::load(&obj).min_neighbors, MIN_NEIGHBORS);

        let obj = json!({ "objectMatchData": { "minNeighbors": 99 } });
        assert_eq!(ObjectDetectParameters::load(&obj).min_neighbors, MIN_NEIGHBORS);
    }

    #[test]
    fn object_legacy_path_applies_same_normalization() {
        let legacy = json!({
            "modelDataPath": "/models/front.json",
            "scaleFactor": 0.9,
            "minNeighbors": 42,
            "minSize": { "width": 8, "height": 8 },
        });
        let params = ObjectDetectParameters::load(&legacy);
        assert_eq!(params.model_path, "/models/front.json");
        assert_eq!(params.scale_factor, 1.1);
        assert_eq!(params.min_neighbors, MIN_NEIGHBORS);
        assert_eq!(params.min_size.width, 8);
        assert!(params.max_size.is_unbounded());
    }

    #[test]
    fn object_legacy_and_namespaced_loads_are_equivalent() {
        let legacy = json!({
            "modelDataPath": "/models/front.json",
            "scaleFactor": 1.3,
            "minNeighbors": 4,
            "minSize": { "width": 8, "height": 8 },
            "maxSize": { "width": 64, "height": 64 },
        });
        let namespaced = json!({
            "objectMatchData": {
                "modelPath": "/models/front.json",
                "scaleFactor": 1.3,
                "minNeighbors": 4,
                "minSize": { "width": 8, "height": 8 },
                "maxSize": { "width": 64, "height": 64 },
            }
        });
        assert_eq!(
            ObjectDetectParameters::load(&legacy),
            ObjectDetectParameters::load(&namespaced)
        );
    }

    #[test]
    fn object_save_load_roundtrip() {
        let params = ObjectDetectParameters {
            model_path: "/models/logo.json".to_string(),
            scale_factor: 1.25,
            min_neighbors: 5,
            min_size: SizeParameter {
                width: 16,
                height: 16,
            },
            max_size: SizeParameter {
                width: 128,
                height: 128,
            },
        };
        let mut obj = Map::new();
        params.save(&mut obj);
        assert_eq!(ObjectDetectParameters::load(&Value::Object(obj)), params);
    }

    #[test]
    fn effective_scale_factor_guards_direct_construction() {
        let params = ObjectDetectParameters {
            scale_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(params.effective_scale_factor(), 1.1);
    }

    #[test]
    fn area_legacy_and_namespaced_loads_are_equivalent() {
        let legacy = json!({
            "checkAreaEnabled": true,
            "checkArea": { "x": 4, "y": 6, "w": 10, "h": 12 },
        });
        let namespaced = json!({
            "areaData": {
                "enabled": true,
                "area": { "x": 4, "y": 6, "w": 10, "h": 12 },
            }
        });
        assert_eq!(AreaParameters::load(&legacy), AreaParameters::load(&namespaced));
    }

    #[test]
    fn area_crop_clamps_to_frame_bounds() {
        let frame = RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255]));
        let area = AreaParameters {
            enabled: true,
            area: Region::new(12, 12, 10, 10),
        };
        let cropped = area.crop(&frame).unwrap();
        assert_eq!(cropped.width(), 4);
        assert_eq!(cropped.height(), 4);
    }

    #[test]
    fn area_disabled_returns_none() {
        let frame = RgbaImage::new(16, 16);
        let area = AreaParameters::default();
        assert!(area.crop(&frame).is_none());
    }
}
