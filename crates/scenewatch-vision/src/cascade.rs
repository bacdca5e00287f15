//! 캐스케이드 객체 검출.
//!
//! 단계별 분류기를 멀티스케일 슬라이딩 윈도우로 적용한다. 모델은
//! 사각 특징(Haar류) 트리의 단계 목록을 담은 JSON 파일로, 검출기
//! 생성 시점에 한 번 로드된다 — 검출 호출마다 다시 읽지 않는다.
//!
//! 윈도우 평가는 적분 이미지 기반이며 윈도우 표준편차로 정규화한다.
//! 원시 검출은 유사 사각형끼리 묶어 `minNeighbors`보다 많은 중첩을
//! 가진 군집만 확정한다.

use std::fs;
use std::path::Path;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use scenewatch_core::models::frame::Region;

use crate::params::ObjectDetectParameters;

/// 캐스케이드 모델 로드 에러
#[derive(Debug, Error)]
pub enum CascadeError {
    /// 모델 파일 읽기 실패
    #[error("모델 파일 읽기 실패: {0}")]
    Read(#[from] std::io::Error),

    /// 모델 파싱 실패
    #[error("모델 파싱 실패: {0}")]
    Parse(#[from] serde_json::Error),

    /// 모델 구조 오류
    #[error("모델 형식 오류: {0}")]
    Invalid(String),
}

// ============================================================
// 모델 구조
// ============================================================

/// 가중치 달린 특징 사각형 (윈도우 기준 좌표)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub weight: f64,
}

/// 사각 특징 — 구성 사각형들의 가중 평균 밝기 차
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<FeatureRect>,
}

/// 약분류기 하나 — 특징값을 임계값과 비교해 투표한다
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakClassifier {
    pub feature: HaarFeature,
    pub threshold: f64,
    pub pass_value: f64,
    pub fail_value: f64,
}

/// 분류 단계 — 투표 합이 임계값에 미달하면 윈도우를 조기 기각한다
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f64,
    pub trees: Vec<WeakClassifier>,
}

/// 사전 학습된 캐스케이드 모델
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

// ============================================================
// 적분 이미지
// ============================================================

/// 합/제곱합 적분 이미지 — (w+1) x (h+1) 누적 테이블
struct IntegralImage {
    width: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl IntegralImage {
    fn build(gray: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        let mut sq_sum = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width {
                let v = gray[y * width + x];
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            width: stride,
            sum,
            sq_sum,
        }
    }

    fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.width;
        self.sum[(y + h) * s + x + w] + self.sum[y * s + x]
            - self.sum[y * s + x + w]
            - self.sum[(y + h) * s + x]
    }

    fn rect_sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.width;
        self.sq_sum[(y + h) * s + x + w] + self.sq_sum[y * s + x]
            - self.sq_sum[y * s + x + w]
            - self.sq_sum[(y + h) * s + x]
    }
}

// ============================================================
// 검출기
// ============================================================

/// 캐스케이드 검출기.
///
/// 모델 경로 해석과 파일 로드는 생성 시점의 가변 외부 의존성이다 —
/// 실패는 생성 에러로 드러나고, 검출 호출에서는 다시 일어나지 않는다.
#[derive(Debug)]
pub struct CascadeDetector {
    model: CascadeModel,
}

impl CascadeDetector {
    /// JSON 모델 파일에서 검출기 생성
    pub fn from_file(path: &Path) -> Result<Self, CascadeError> {
        let text = fs::read_to_string(path)?;
        let model: CascadeModel = serde_json::from_str(&text)?;
        Self::from_model(model)
    }

    /// 파싱된 모델에서 검출기 생성 (구조 검증 포함)
    pub fn from_model(model: CascadeModel) -> Result<Self, CascadeError> {
        if model.window_width == 0 || model.window_height == 0 {
            return Err(CascadeError::Invalid("검출 창 크기가 0".to_string()));
        }
        if model.stages.is_empty() {
            return Err(CascadeError::Invalid("단계가 없는 모델".to_string()));
        }
        for stage in &model.stages {
            for tree in &stage.trees {
                for rect in &tree.feature.rects {
                    if rect.w == 0
                        || rect.h == 0
                        || rect.x + rect.w > model.window_width
                        || rect.y + rect.h > model.window_height
                    {
                        return Err(CascadeError::Invalid(format!(
                            "특징 사각형이 검출 창을 벗어남: ({}, {}) {}x{}",
                            rect.x, rect.y, rect.w, rect.h
                        )));
                    }
                }
            }
        }
        Ok(Self { model })
    }

    /// 모델의 기준 검출 창 크기
    pub fn window_size(&self) -> (u32, u32) {
        (self.model.window_width, self.model.window_height)
    }

    /// 멀티스케일 검출.
    ///
    /// 검출이 없으면 빈 목록 — 오류가 아니다. 반환 사각형은 분류기
    /// 자체의 이웃 군집화 외에 추가 병합을 거치지 않는다.
    pub fn detect(&self, frame: &RgbaImage, params: &ObjectDetectParameters) -> Vec<Region> {
        let (fw, fh) = (frame.width(), frame.height());
        if fw == 0 || fh == 0 {
            return Vec::new();
        }

        let gray = gray_f64(frame);
        let integral = IntegralImage::build(&gray, fw as usize, fh as usize);

        let scale_factor = params.effective_scale_factor();
        let (base_w, base_h) = (self.model.window_width, self.model.window_height);

        let mut raw = Vec::new();
        let mut scale = 1.0f64;
        loop {
            let ww = (base_w as f64 * scale).round() as u32;
            let wh = (base_h as f64 * scale).round() as u32;
            if ww > fw || wh > fh {
                break;
            }

            if self.window_size_in_bounds(ww, wh, params) {
                let step = (scale * 2.0).round().max(1.0) as usize;
                for y in (0..=(fh - wh) as usize).step_by(step) {
                    for x in (0..=(fw - ww) as usize).step_by(step) {
                        if self.window_passes(&integral, x, y, scale, ww, wh) {
                            raw.push(Region::new(x as u32, y as u32, ww, wh));
                        }
                    }
                }
            }

            scale *= scale_factor;
        }

        let confirmed = group_regions(&raw, params.min_neighbors);
        debug!(
            raw = raw.len(),
            confirmed = confirmed.len(),
            "캐스케이드 검출 완료"
        );
        confirmed
    }

    fn window_size_in_bounds(&self, ww: u32, wh: u32, params: &ObjectDetectParameters) -> bool {
        if ww < params.min_size.width || wh < params.min_size.height {
            return false;
        }
        if !params.max_size.is_unbounded()
            && (ww > params.max_size.width || wh > params.max_size.height)
        {
            return false;
        }
        true
    }

    fn window_passes(
        &self,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        scale: f64,
        ww: u32,
        wh: u32,
    ) -> bool {
        let area = (ww * wh) as f64;
        let mean = integral.rect_sum(x, y, ww as usize, wh as usize) / area;
        let var = integral.rect_sq_sum(x, y, ww as usize, wh as usize) / area - mean * mean;
        // 평탄 윈도우의 분모 폭주 방지
        let norm = var.max(0.0).sqrt().max(1e-3);

        for stage in &self.model.stages {
            let mut votes = 0.0f64;
            for tree in &stage.trees {
                let mut value = 0.0f64;
                for rect in &tree.feature.rects {
                    let rx = x + (rect.x as f64 * scale).round() as usize;
                    let ry = y + (rect.y as f64 * scale).round() as usize;
                    let rw = ((rect.w as f64 * scale).round() as usize).max(1);
                    let rh = ((rect.h as f64 * scale).round() as usize).max(1);
                    let rect_area = (rw * rh) as f64;
                    value += rect.weight * integral.rect_sum(rx, ry, rw, rh) / rect_area;
                }
                let feature = value / norm;
                votes += if feature >= tree.threshold {
                    tree.pass_value
                } else {
                    tree.fail_value
                };
            }
            if votes < stage.threshold {
                return false;
            }
        }
        true
    }
}

fn gray_f64(image: &RgbaImage) -> Vec<f64> {
    image
        .as_raw()
        .chunks_exact(4)
        .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
        .collect()
}

// ============================================================
// 이웃 군집화
// ============================================================

/// 원시 검출을 유사 사각형 군집으로 묶고, 중첩 수가 `min_neighbors`를
/// 초과하는 군집만 평균 사각형으로 확정한다. `min_neighbors` 0은
/// 군집화 없이 원시 검출을 그대로 돌려준다.
pub(crate) fn group_regions(raw: &[Region], min_neighbors: u32) -> Vec<Region> {
    if raw.is_empty() {
        return Vec::new();
    }
    if min_neighbors == 0 {
        return raw.to_vec();
    }

    // 위치/크기 허용 오차 — 작은 쪽 치수의 20%
    const EPS: f64 = 0.2;

    let mut parent: Vec<usize> = (0..raw.len()).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    let similar = |a: &Region, b: &Region| -> bool {
        let delta = EPS * 0.5 * (a.w.min(b.w) + a.h.min(b.h)) as f64;
        let dx = (a.x as f64 - b.x as f64).abs();
        let dy = (a.y as f64 - b.y as f64).abs();
        let dr = ((a.x + a.w) as f64 - (b.x + b.w) as f64).abs();
        let db = ((a.y + a.h) as f64 - (b.y + b.h) as f64).abs();
        dx <= delta && dy <= delta && dr <= delta && db <= delta
    };

    for i in 0..raw.len() {
        for j in (i + 1)..raw.len() {
            if similar(&raw[i], &raw[j]) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut clusters: std::collections::HashMap<usize, (u64, u64, u64, u64, u32)> =
        std::collections::HashMap::new();
    for i in 0..raw.len() {
        let root = find(&mut parent, i);
        let entry = clusters.entry(root).or_insert((0, 0, 0, 0, 0));
        entry.0 += raw[i].x as u64;
        entry.1 += raw[i].y as u64;
        entry.2 += raw[i].w as u64;
        entry.3 += raw[i].h as u64;
        entry.4 += 1;
    }

    let mut confirmed: Vec<Region> = clusters
        .values()
        .filter(|(_, _, _, _, count)| *count > min_neighbors)
        .map(|(sx, sy, sw, sh, count)| {
            let c = *count as u64;
            Region::new(
                (sx / c) as u32,
                (sy / c) as u32,
                (sw / c) as u32,
                (sh / c) as u32,
            )
        })
        .collect();
    // 결정적 순서 보장
    confirmed.sort_by_key(|r| (r.y, r.x));
    confirmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::Rgba;
    use std::io::Write;

    /// 상하 밝기 차를 감지하는 단일 단계 모델
    fn edge_model() -> CascadeModel {
        CascadeModel {
            window_width: 16,
            window_height: 16,
            stages: vec![Stage {
                threshold: 0.5,
                trees: vec![WeakClassifier {
                    feature: HaarFeature {
                        rects: vec![
                            FeatureRect {
                                x: 0,
                                y: 0,
                                w: 16,
                                h: 8,
                                weight: 1.0,
                            },
                            FeatureRect {
                                x: 0,
                                y: 8,
                                w: 16,
                                h: 8,
                                weight: -1.0,
                            },
                        ],
                    },
                    threshold: 0.5,
                    pass_value: 1.0,
                    fail_value: 0.0,
                }],
            }],
        }
    }

    /// 위 절반 밝고 아래 절반 어두운 프레임
    fn edge_frame() -> RgbaImage {
        let mut frame = RgbaImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                let v = if y < 32 { 220 } else { 30 };
                frame.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        frame
    }

    #[test]
    fn model_validation_rejects_zero_window() {
        let mut model = edge_model();
        model.window_width = 0;
        assert_matches!(
            CascadeDetector::from_model(model),
            Err(CascadeError::Invalid(_))
        );
    }

    #[test]
    fn model_validation_rejects_empty_stages() {
        let mut model = edge_model();
        model.stages.clear();
        assert_matches!(
            CascadeDetector::from_model(model),
            Err(CascadeError::Invalid(_))
        );
    }

    #[test]
    fn model_validation_rejects_out_of_window_feature() {
        let mut model = edge_model();
        model.stages[0].trees[0].feature.rects[0].w = 99;
        assert_matches!(
            CascadeDetector::from_model(model),
            Err(CascadeError::Invalid(_))
        );
    }

    #[test]
    fn from_file_loads_serialized_model() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let text = serde_json::to_string(&edge_model()).unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let detector = CascadeDetector::from_file(file.path()).unwrap();
        assert_eq!(detector.window_size(), (16, 16));
    }

    #[test]
    fn from_file_missing_path_is_read_error() {
        let result = CascadeDetector::from_file(Path::new("/없는/경로/model.json"));
        assert_matches!(result, Err(CascadeError::Read(_)));
    }

    #[test]
    fn from_file_bad_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert_matches!(
            CascadeDetector::from_file(file.path()),
            Err(CascadeError::Parse(_))
        );
    }

    #[test]
    fn blank_frame_returns_empty_list_not_error() {
        let detector = CascadeDetector::from_model(edge_model()).unwrap();
        let frame = RgbaImage::from_pixel(64, 64, Rgba([128, 128, 128, 255]));
        let result = detector.detect(&frame, &ObjectDetectParameters::default());
        assert!(result.is_empty());
    }

    #[test]
    fn detects_synthetic_edge_with_neighbor_grouping() {
        let detector = CascadeDetector::from_model(edge_model()).unwrap();
        // 기준 스케일만 스캔하도록 최대 크기를 창 크기로 고정 (minNeighbors = 3)
        let params = ObjectDetectParameters {
            max_size: crate::params::SizeParameter {
                width: 16,
                height: 16,
            },
            ..Default::default()
        };
        let result = detector.detect(&edge_frame(), &params);

        assert!(!result.is_empty());
        let region = &result[0];
        assert_eq!(region.w, 16);
        assert_eq!(region.h, 16);
        // 확정 영역은 밝기 경계(y = 32)를 가로지른다
        assert!(region.y < 32 && region.y + region.h > 32);
    }

    #[test]
    fn min_size_excludes_base_window() {
        let detector = CascadeDetector::from_model(edge_model()).unwrap();
        let params = ObjectDetectParameters {
            min_size: crate::params::SizeParameter {
                width: 100,
                height: 100,
            },
            ..Default::default()
        };
        // 프레임(64x64)보다 큰 최소 크기 → 스캔할 스케일 없음
        let result = detector.detect(&edge_frame(), &params);
        assert!(result.is_empty());
    }

    #[test]
    fn group_regions_keeps_clusters_above_min_neighbors() {
        let cluster = vec![
            Region::new(10, 10, 20, 20),
            Region::new(11, 10, 20, 20),
            Region::new(10, 11, 20, 20),
            Region::new(12, 11, 20, 20),
        ];
        let mut raw = cluster.clone();
        raw.push(Region::new(100, 100, 20, 20)); // 동떨어진 단일 검출

        let confirmed = group_regions(&raw, 3);
        assert_eq!(confirmed.len(), 1);
        let region = &confirmed[0];
        assert!(region.x >= 10 && region.x <= 12);
        assert_eq!(region.w, 20);
    }

    #[test]
    fn group_regions_zero_neighbors_passes_raw_through() {
        let raw = vec![Region::new(0, 0, 8, 8), Region::new(40, 40, 8, 8)];
        let confirmed = group_regions(&raw, 0);
        assert_eq!(confirmed.len(), 2);
    }
}
