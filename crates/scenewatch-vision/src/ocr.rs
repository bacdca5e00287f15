//! OCR 텍스트 인식.
//!
//! `leptess` 기반 Tesseract 래퍼. `ocr` feature flag가 꺼져 있으면
//! 엔진 초기화가 항상 실패하고 인식은 "사용 불가" 결과로 단락된다.
//!
//! 파라미터 객체가 영속 엔진을 소유한다. 엔진 구성은 비싸고(디스크
//! 모델 로드) 실패할 수 있으며, 객체당 정확히 한 번 시도된다 — 실패
//! 시 그 객체는 수명 내내 비활성이고 재시도하지 않는다. 복제는 네이티브
//! 핸들을 공유하지 않고 새 엔진을 구성해 동일하게 설정한다.
//!
//! 엔진은 두 스레드의 동시 호출에 안전하지 않다. 호출부는 공유 캡처
//! 잠금의 직렬화 영역에 가두거나, 평가 컨텍스트마다 복제본을 두어야
//! 한다.

#[cfg(feature = "ocr")]
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use scenewatch_core::models::outcome::MatchOutcome;

/// OCR 에러 타입
#[derive(Debug, Error)]
pub enum OcrError {
    /// Tesseract 초기화 실패
    #[error("OCR 초기화 실패: {0}")]
    Init(String),

    /// 이미지 설정 실패
    #[error("OCR 이미지 설정 실패: {0}")]
    ImageSetup(String),

    /// 텍스트 추출 실패
    #[error("OCR 텍스트 추출 실패: {0}")]
    Extraction(String),
}

// ============================================================
// 페이지 분할 모드
// ============================================================

/// OCR 엔진의 텍스트 레이아웃 가정 (Tesseract PSM 부분집합)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageSegMode {
    /// 자동 분할
    Auto,
    /// 단일 세로 열
    SingleColumn,
    /// 단일 텍스트 블록
    #[default]
    SingleBlock,
    /// 단일 줄
    SingleLine,
    /// 단일 단어
    SingleWord,
    /// 흩어진 텍스트
    SparseText,
}

impl PageSegMode {
    /// Tesseract PSM 저장 코드
    pub fn code(self) -> i64 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
            PageSegMode::SparseText => 11,
        }
    }

    /// 저장 코드 → 모드. 알 수 없는 코드는 기본 모드.
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => PageSegMode::Auto,
            4 => PageSegMode::SingleColumn,
            6 => PageSegMode::SingleBlock,
            7 => PageSegMode::SingleLine,
            8 => PageSegMode::SingleWord,
            11 => PageSegMode::SparseText,
            _ => PageSegMode::default(),
        }
    }
}

// ============================================================
// 텍스트 색 필터
// ============================================================

/// 분리 대상 텍스트 색
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// 색 거리 임계값 — 근사 일치 판정 (정확 일치가 아님)
const COLOR_DISTANCE_THRESHOLD: f64 = 96.0;

/// 대상 색과 근사 일치하는 픽셀을 검정으로, 나머지를 흰색으로
/// 이진화한다. OCR 전 대비를 극대화하는 전처리.
pub fn isolate_color(frame: &RgbaImage, color: &TextColor) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());
    let mut out = RgbaImage::new(w, h);
    let src = frame.as_raw();
    let dst: &mut [u8] = &mut out;
    let threshold_sq = COLOR_DISTANCE_THRESHOLD * COLOR_DISTANCE_THRESHOLD;

    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let dr = src_px[0] as f64 - color.red as f64;
        let dg = src_px[1] as f64 - color.green as f64;
        let db = src_px[2] as f64 - color.blue as f64;
        let dist_sq = dr * dr + dg * dg + db * db;
        let v = if dist_sq <= threshold_sq { 0 } else { 255 };
        dst_px[0] = v;
        dst_px[1] = v;
        dst_px[2] = v;
        dst_px[3] = 255;
    }
    out
}

// ============================================================
// 정규식 필터
// ============================================================

/// 추출 텍스트 정규식 필터.
///
/// 비활성이거나 식이 비었거나 컴파일 불가면 "설정 안 됨"으로 취급한다
/// — 이때 매칭 규칙은 "비어 있지 않은 텍스트면 일치"가 된다.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    pub enabled: bool,
    expression: String,
    compiled: Option<Regex>,
}

impl Default for RegexFilter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RegexFilter {
    /// 필터 생성. 컴파일 불가한 식은 경고 후 비활성 취급.
    pub fn new(enabled: bool, expression: &str) -> Self {
        let compiled = if expression.is_empty() {
            None
        } else {
            match Regex::new(expression) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(expression, error = %e, "정규식 컴파일 실패, 필터 비활성");
                    None
                }
            }
        };
        Self {
            enabled,
            expression: expression.to_string(),
            compiled,
        }
    }

    /// 꺼진 필터
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            expression: String::new(),
            compiled: None,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 필터가 실제로 적용되는 상태인지
    pub fn is_active(&self) -> bool {
        self.enabled && self.compiled.is_some()
    }

    /// 텍스트가 정규식과 일치하는지 (활성 상태 전제)
    pub fn matches(&self, text: &str) -> bool {
        self.compiled.as_ref().is_some_and(|re| re.is_match(text))
    }
}

// ============================================================
// 인식 엔진 (feature 게이트)
// ============================================================

/// 영속 Tesseract 엔진 핸들.
///
/// 내부 Mutex는 `&self` 경유 호출을 가능하게 할 뿐, 논리적 동시 사용을
/// 허용하지 않는다 — 직렬화는 호출부 책임이다.
#[cfg(feature = "ocr")]
struct OcrEngine {
    api: Mutex<leptess::LepTess>,
}

#[cfg(feature = "ocr")]
impl OcrEngine {
    fn init(tessdata: Option<&Path>, mode: PageSegMode) -> Result<Self, OcrError> {
        let datapath = tessdata.map(|p| p.to_string_lossy().to_string());
        let lt = leptess::LepTess::new(datapath.as_deref(), "eng")
            .map_err(|e| OcrError::Init(format!("{e}")))?;
        let engine = Self {
            api: Mutex::new(lt),
        };
        engine.set_page_seg_mode(mode)?;
        Ok(engine)
    }

    fn set_page_seg_mode(&self, mode: PageSegMode) -> Result<(), OcrError> {
        let mut api = self.api.lock();
        api.set_variable(
            leptess::Variable::TesseditPagesegMode,
            &mode.code().to_string(),
        )
        .map_err(|e| OcrError::Init(format!("페이지 분할 모드 설정 실패: {e}")))
    }

    fn extract_text(&self, image: &RgbaImage) -> Result<String, OcrError> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| OcrError::ImageSetup(format!("이미지 인코딩 실패: {e}")))?;

        let mut api = self.api.lock();
        api.set_image_from_mem(&buf)
            .map_err(|e| OcrError::ImageSetup(format!("{e}")))?;
        let text = api
            .get_utf8_text()
            .map_err(|e| OcrError::Extraction(format!("{e}")))?;
        Ok(text)
    }
}

/// `ocr` feature 비활성 시의 엔진 — 초기화가 항상 실패한다
#[cfg(not(feature = "ocr"))]
struct OcrEngine {
    _api: Mutex<()>,
}

#[cfg(not(feature = "ocr"))]
impl OcrEngine {
    fn init(_tessdata: Option<&Path>, _mode: PageSegMode) -> Result<Self, OcrError> {
        Err(OcrError::Init("ocr feature 비활성화".to_string()))
    }

    fn set_page_seg_mode(&self, _mode: PageSegMode) -> Result<(), OcrError> {
        Ok(())
    }

    fn extract_text(&self, _image: &RgbaImage) -> Result<String, OcrError> {
        Err(OcrError::Extraction("ocr feature 비활성화".to_string()))
    }
}

// ============================================================
// OCR 파라미터
// ============================================================

/// OCR 파라미터 — 영속 인식 엔진을 소유한다.
///
/// `pattern`은 상위 매크로 엔진이 변수 치환을 끝낸 뒤의 텍스트다.
pub struct OcrParameters {
    /// 기대 텍스트 (정규식 비활성 시 참고용 표시 문자열)
    pub pattern: String,
    /// 추출 텍스트 필터
    pub regex: RegexFilter,
    /// 분리 대상 텍스트 색
    pub color: TextColor,
    page_seg_mode: PageSegMode,
    tessdata_path: Option<PathBuf>,
    engine: Option<OcrEngine>,
}

impl OcrParameters {
    /// 엔진 구성을 포함한 생성. 구성 실패 시 이 객체는 수명 내내
    /// 비활성이며 재시도하지 않는다.
    pub fn new(tessdata_path: Option<&Path>) -> Self {
        let page_seg_mode = PageSegMode::default();
        let engine = match OcrEngine::init(tessdata_path, page_seg_mode) {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!(error = %e, "OCR 엔진 초기화 실패, 파라미터 객체 영구 비활성");
                None
            }
        };
        Self {
            pattern: String::new(),
            regex: RegexFilter::disabled(),
            color: TextColor::default(),
            page_seg_mode,
            tessdata_path: tessdata_path.map(Path::to_path_buf),
            engine,
        }
    }

    /// 엔진이 살아 있는지
    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn page_seg_mode(&self) -> PageSegMode {
        self.page_seg_mode
    }

    /// 페이지 분할 모드 변경 — 살아 있는 엔진에도 즉시 적용
    pub fn set_page_seg_mode(&mut self, mode: PageSegMode) {
        self.page_seg_mode = mode;
        if let Some(engine) = &self.engine {
            if let Err(e) = engine.set_page_seg_mode(mode) {
                warn!(error = %e, "페이지 분할 모드 적용 실패");
            }
        }
    }

    /// 현행 형식으로 저장 — `ocrData` 중첩 객체
    pub fn save(&self, obj: &mut Map<String, Value>) {
        obj.insert(
            "ocrData".to_string(),
            json!({
                "pattern": self.pattern,
                "regex": {
                    "enabled": self.regex.enabled,
                    "expression": self.regex.expression(),
                },
                "textColor": {
                    "red": self.color.red,
                    "green": self.color.green,
                    "blue": self.color.blue,
                },
                "pageSegMode": self.page_seg_mode.code(),
            }),
        );
    }

    /// 로드 — 구버전 평면 키 경로는 원래부터 없었다 (`ocrData`만).
    /// 읽은 페이지 분할 모드를 살아 있는 엔진에 재적용한다.
    pub fn load(&mut self, obj: &Value) {
        let Some(data) = obj.get("ocrData") else {
            return;
        };
        self.pattern = data
            .get("pattern")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let regex_data = data.get("regex");
        self.regex = RegexFilter::new(
            regex_data
                .and_then(|r| r.get("enabled"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            regex_data
                .and_then(|r| r.get("expression"))
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        self.color = load_color(data.get("textColor"));
        let mode = PageSegMode::from_code(
            data.get("pageSegMode")
                .and_then(Value::as_i64)
                .unwrap_or_else(|| PageSegMode::default().code()),
        );
        self.set_page_seg_mode(mode);
    }

    /// 프레임에서 텍스트를 추출해 조건과 비교한다.
    ///
    /// 엔진이 비활성이면 네이티브 호출 없이 즉시 사용 불가 결과로
    /// 단락한다. 정규식이 설정돼 있으면 일치 여부, 아니면 비어 있지
    /// 않은 텍스트 추출 여부가 성공 조건이다.
    pub fn recognize(&self, frame: &RgbaImage) -> MatchOutcome {
        let Some(engine) = &self.engine else {
            debug!("OCR 엔진 비활성, 인식 건너뜀");
            return MatchOutcome::OcrUnavailable;
        };

        let isolated = isolate_color(frame, &self.color);
        let text = match engine.extract_text(&isolated) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "텍스트 추출 실패");
                return MatchOutcome::TextFailure;
            }
        };
        let text = text.trim();

        let matched = if self.regex.is_active() {
            self.regex.matches(text)
        } else {
            !text.is_empty()
        };
        if matched {
            MatchOutcome::TextSuccess(text.to_string())
        } else {
            MatchOutcome::TextFailure
        }
    }
}

impl Clone for OcrParameters {
    /// 복제는 네이티브 핸들을 절대 공유하지 않는다 — 새 엔진을
    /// 구성하고 동일한 페이지 분할 모드로 설정한다. 원본이 비활성이어도
    /// 복제본은 새 객체이므로 구성을 새로 시도한다.
    fn clone(&self) -> Self {
        let engine = match OcrEngine::init(self.tessdata_path.as_deref(), self.page_seg_mode) {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!(error = %e, "복제본 OCR 엔진 초기화 실패");
                None
            }
        };
        Self {
            pattern: self.pattern.clone(),
            regex: self.regex.clone(),
            color: self.color,
            page_seg_mode: self.page_seg_mode,
            tessdata_path: self.tessdata_path.clone(),
            engine,
        }
    }
}

impl std::fmt::Debug for OcrParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrParameters")
            .field("pattern", &self.pattern)
            .field("regex", &self.regex)
            .field("color", &self.color)
            .field("page_seg_mode", &self.page_seg_mode)
            .field("available", &self.is_available())
            .finish()
    }
}

fn load_color(value: Option<&Value>) -> TextColor {
    let Some(value) = value else {
        return TextColor::default();
    };
    TextColor {
        red: value.get("red").and_then(Value::as_u64).unwrap_or(0) as u8,
        green: value.get("green").and_then(Value::as_u64).unwrap_or(0) as u8,
        blue: value.get("blue").and_then(Value::as_u64).unwrap_or(0) as u8,
    }
}
