//! 대상 해석과 프레임 캡처.
//!
//! 해석은 순수 함수이며 I/O를 하지 않는다. 캡처는 호스트 캡처 기계를
//! 통한 블로킹 호출로, 공유 캡처 잠금 가드를 시그니처로 요구한다 —
//! 잠금 없이는 타입 수준에서 캡처할 수 없다.

use std::sync::Arc;

use tracing::debug;

use scenewatch_core::models::frame::CaptureResult;
use scenewatch_core::models::target::VideoTarget;
use scenewatch_core::ports::capture::{CaptureGuard, FrameSource, VideoHost};

// ============================================================
// 해석
// ============================================================

/// 대상 기술자를 캡처 핸들로 해석한다.
///
/// 무효 대상(죽은 약참조, 미구성 메인 출력)은 None — 실패가 아니다.
pub fn resolve(target: &VideoTarget, host: &dyn VideoHost) -> Option<Arc<dyn FrameSource>> {
    match target {
        VideoTarget::MainOutput => host.main_output(),
        VideoTarget::Source { source, .. } => source.upgrade(),
        VideoTarget::Scene { scene, .. } => scene.upgrade(),
    }
}

// ============================================================
// 캡처
// ============================================================

/// 해석된 핸들에서 프레임 하나를 블로킹 캡처한다.
///
/// 호출자는 세 가지 결과로 분기해야 한다: 미완료(`completed == false`),
/// 완료됐지만 면적 0, 정상 프레임.
pub fn capture(source: &dyn FrameSource, _capture: &CaptureGuard<'_>) -> CaptureResult {
    let result = source.capture_frame();
    debug!(
        source = source.name(),
        completed = result.completed,
        width = result.width(),
        height = result.height(),
        "캡처 수행"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use scenewatch_core::models::target::WeakSourceRef;
    use scenewatch_core::ports::capture::CaptureLock;

    struct FixedSource {
        name: String,
        frame: RgbaImage,
    }

    impl FrameSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn capture_frame(&self) -> CaptureResult {
            CaptureResult::completed(self.frame.clone())
        }
    }

    struct FixedHost {
        main: Option<Arc<dyn FrameSource>>,
    }

    impl VideoHost for FixedHost {
        fn main_output(&self) -> Option<Arc<dyn FrameSource>> {
            self.main.clone()
        }

        fn find_source(&self, _name: &str) -> Option<Arc<dyn FrameSource>> {
            None
        }

        fn find_scene(&self, _name: &str) -> Option<Arc<dyn FrameSource>> {
            None
        }
    }

    #[test]
    fn resolve_main_output_through_host() {
        let source: Arc<dyn FrameSource> = Arc::new(FixedSource {
            name: "출력".to_string(),
            frame: RgbaImage::new(4, 4),
        });
        let host = FixedHost {
            main: Some(source),
        };
        assert!(resolve(&VideoTarget::MainOutput, &host).is_some());

        let empty_host = FixedHost { main: None };
        assert!(resolve(&VideoTarget::MainOutput, &empty_host).is_none());
    }

    #[test]
    fn resolve_dead_weak_reference_is_none() {
        let host = FixedHost { main: None };
        let target = VideoTarget::Source {
            name: "사라진 소스".to_string(),
            source: WeakSourceRef::empty(),
        };
        assert!(resolve(&target, &host).is_none());
    }

    #[test]
    fn capture_returns_source_result() {
        let source = FixedSource {
            name: "캠".to_string(),
            frame: RgbaImage::new(6, 3),
        };
        let lock = CaptureLock::new();
        let guard = lock.lock();
        let result = capture(&source, &guard);
        assert!(result.completed);
        assert_eq!(result.width(), 6);
        assert_eq!(result.height(), 3);
    }
}
