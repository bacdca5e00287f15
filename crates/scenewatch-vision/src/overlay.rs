//! 진단 오버레이 렌더러.
//!
//! (프레임, 평가 결과) → 주석 비트맵 순수 함수. 성공 결과의 영역마다
//! 고정 강조색 테두리를 그리고, 그 외 결과는 프레임을 그대로 돌려준다.
//! 입력은 절대 변형하지 않는다.

use image::{Rgba, RgbaImage};

use scenewatch_core::models::frame::Region;
use scenewatch_core::models::outcome::MatchOutcome;

/// 강조 테두리 색
const HIGHLIGHT_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
/// 테두리 두께 (픽셀)
const STROKE_WIDTH: u32 = 2;

/// 평가 결과를 프레임에 그린다.
pub fn render(frame: &RgbaImage, outcome: &MatchOutcome) -> RgbaImage {
    match outcome {
        MatchOutcome::PatternSuccess(regions) | MatchOutcome::ObjectSuccess(regions) => {
            let mut annotated = frame.clone();
            for region in regions {
                draw_rect(&mut annotated, region);
            }
            annotated
        }
        MatchOutcome::Loading
        | MatchOutcome::CaptureFailed
        | MatchOutcome::EmptyFrame
        | MatchOutcome::PatternFailure
        | MatchOutcome::ObjectFailure
        | MatchOutcome::TextSuccess(_)
        | MatchOutcome::TextFailure
        | MatchOutcome::OcrUnavailable => frame.clone(),
    }
}

/// 채우지 않은 사각형 테두리 — 프레임 경계를 벗어나는 부분은 잘린다
fn draw_rect(image: &mut RgbaImage, region: &Region) {
    if region.is_empty() {
        return;
    }
    let (fw, fh) = (image.width(), image.height());

    for t in 0..STROKE_WIDTH.min(region.h) {
        // 위/아래 변
        let top = region.y + t;
        let bottom = region.y + region.h - 1 - t;
        for x in region.x..region.x.saturating_add(region.w) {
            if x >= fw {
                break;
            }
            if top < fh {
                image.put_pixel(x, top, HIGHLIGHT_COLOR);
            }
            if bottom < fh && bottom != top {
                image.put_pixel(x, bottom, HIGHLIGHT_COLOR);
            }
        }
    }
    for t in 0..STROKE_WIDTH.min(region.w) {
        // 좌/우 변
        let left = region.x + t;
        let right = region.x + region.w - 1 - t;
        for y in region.y..region.y.saturating_add(region.h) {
            if y >= fh {
                break;
            }
            if left < fw {
                image.put_pixel(left, y, HIGHLIGHT_COLOR);
            }
            if right < fw && right != left {
                image.put_pixel(right, y, HIGHLIGHT_COLOR);
            }
        }
    }
}
