//! 패턴(템플릿) 매칭.
//!
//! 작은 참조 이미지와 프레임 영역 간 정규화 상관 점수 표면을 계산하고
//! 임계값으로 이진화한다. 적중 셀 좌표가 패턴 크기 사각형의 좌상단
//! 원점이 된다.

use image::RgbaImage;
use tracing::debug;

use crate::params::PatternMatchParameters;

/// 상관 점수 계산 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// 정규화 교차 상관
    #[default]
    CorrelationNormed,
    /// 평균 제거 정규화 상관 (상관 계수)
    CorrelationCoeffNormed,
    /// 정규화 제곱차 — 유사도로 변환해 "높을수록 좋음"을 유지한다
    SquaredDifferenceNormed,
}

impl MatchMode {
    /// 저장 코드 → 방식. 알 수 없는 코드는 기본 방식.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => MatchMode::CorrelationNormed,
            1 => MatchMode::CorrelationCoeffNormed,
            2 => MatchMode::SquaredDifferenceNormed,
            _ => MatchMode::default(),
        }
    }

    /// 방식 → 저장 코드
    pub fn code(self) -> i64 {
        match self {
            MatchMode::CorrelationNormed => 0,
            MatchMode::CorrelationCoeffNormed => 1,
            MatchMode::SquaredDifferenceNormed => 2,
        }
    }
}

/// 위치별 유사도 점수의 2차원 표면.
///
/// 이진화를 거친 상태로, 임계값 미달 셀은 0이다. 패턴이 프레임보다
/// 크면 표면은 0x0이며 이는 오류가 아니라 매칭 실패다.
#[derive(Debug, Clone)]
pub struct CorrelationSurface {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl CorrelationSurface {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            values: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// (x, y) 셀의 이진화된 점수
    pub fn value_at(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// 0이 아닌 셀 수 — 1개 이상이면 매칭 성공
    pub fn hit_count(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    /// 적중 셀 좌표 목록. 각 좌표는 패턴 크기 사각형의 좌상단 원점.
    pub fn hits(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.value_at(x, y) != 0.0 {
                    out.push((x, y));
                }
            }
        }
        out
    }
}

/// RGBA → 그레이스케일 (휘도)
fn to_gray(image: &RgbaImage) -> Vec<f64> {
    let raw = image.as_raw();
    let mut gray = Vec::with_capacity((image.width() * image.height()) as usize);
    for px in raw.chunks_exact(4) {
        let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
        gray.push(luma);
    }
    gray
}

/// 패턴 알파 채널에서 마스크 생성 — 알파 0 픽셀은 비교에서 제외
fn alpha_mask(pattern: &RgbaImage) -> Vec<bool> {
    pattern.as_raw().chunks_exact(4).map(|px| px[3] != 0).collect()
}

/// 프레임과 패턴의 상관 표면을 계산하고 임계값으로 이진화한다.
///
/// 임계값 비교는 `>=` — 정확히 임계값과 같은 점수도 적중이다.
/// `use_alpha_as_mask`가 켜지면 알파 0인 패턴 픽셀은 합산에서 빠진다.
pub fn match_pattern(
    frame: &RgbaImage,
    pattern: &RgbaImage,
    params: &PatternMatchParameters,
) -> CorrelationSurface {
    let (fw, fh) = (frame.width(), frame.height());
    let (pw, ph) = (pattern.width(), pattern.height());

    // 패턴이 프레임보다 크면 빈 표면 — 실패이지 오류가 아니다
    if pw == 0 || ph == 0 || pw > fw || ph > fh {
        debug!(
            frame_w = fw,
            frame_h = fh,
            pattern_w = pw,
            pattern_h = ph,
            "패턴이 프레임에 들어가지 않음, 빈 표면"
        );
        return CorrelationSurface::empty();
    }

    let frame_gray = to_gray(frame);
    let pattern_gray = to_gray(pattern);
    let mask = if params.use_alpha_as_mask {
        alpha_mask(pattern)
    } else {
        vec![true; (pw * ph) as usize]
    };

    // 패턴 쪽 합계는 위치와 무관하므로 선계산
    let mut n = 0u64;
    let mut sum_p = 0.0f64;
    let mut sum_p2 = 0.0f64;
    for (i, included) in mask.iter().enumerate() {
        if *included {
            let p = pattern_gray[i];
            n += 1;
            sum_p += p;
            sum_p2 += p * p;
        }
    }

    let surf_w = fw - pw + 1;
    let surf_h = fh - ph + 1;
    let mut values = vec![0.0f32; (surf_w * surf_h) as usize];

    // 마스크가 전부 제외면 점수를 정의할 수 없다 — 전부 0 (실패)
    if n == 0 {
        return CorrelationSurface {
            width: surf_w,
            height: surf_h,
            values,
        };
    }

    let fw_us = fw as usize;
    let pw_us = pw as usize;
    let threshold = params.threshold;

    for oy in 0..surf_h as usize {
        for ox in 0..surf_w as usize {
            let mut sum_f = 0.0f64;
            let mut sum_f2 = 0.0f64;
            let mut sum_fp = 0.0f64;
            for py in 0..ph as usize {
                let frame_row = (oy + py) * fw_us + ox;
                let pattern_row = py * pw_us;
                for px in 0..pw_us {
                    if mask[pattern_row + px] {
                        let f = frame_gray[frame_row + px];
                        let p = pattern_gray[pattern_row + px];
                        sum_f += f;
                        sum_f2 += f * f;
                        sum_fp += f * p;
                    }
                }
            }

            let score = score_for_mode(
                params.match_mode,
                n as f64,
                sum_f,
                sum_f2,
                sum_fp,
                sum_p,
                sum_p2,
            );

            // 이진화: 임계값 이상만 남긴다 (동률 포함)
            if score as f32 >= threshold {
                values[oy * surf_w as usize + ox] = score as f32;
            }
        }
    }

    CorrelationSurface {
        width: surf_w,
        height: surf_h,
        values,
    }
}

/// 합계로부터 방식별 점수 계산
fn score_for_mode(
    mode: MatchMode,
    n: f64,
    sum_f: f64,
    sum_f2: f64,
    sum_fp: f64,
    sum_p: f64,
    sum_p2: f64,
) -> f64 {
    match mode {
        MatchMode::CorrelationNormed => {
            let denom = (sum_f2 * sum_p2).sqrt();
            if denom > 0.0 {
                sum_fp / denom
            } else {
                0.0
            }
        }
        MatchMode::CorrelationCoeffNormed => {
            let cov = sum_fp - sum_f * sum_p / n;
            let var_f = sum_f2 - sum_f * sum_f / n;
            let var_p = sum_p2 - sum_p * sum_p / n;
            let denom = (var_f * var_p).sqrt();
            if denom > f64::EPSILON {
                cov / denom
            } else {
                0.0
            }
        }
        MatchMode::SquaredDifferenceNormed => {
            let sq = (sum_f2 - 2.0 * sum_fp + sum_p2).max(0.0);
            let denom = (sum_f2 * sum_p2).sqrt();
            if denom > 0.0 {
                1.0 - sq / denom
            } else {
                0.0
            }
        }
    }
}
