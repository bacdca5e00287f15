//! 캡처 포트.
//!
//! 실제 캡처 기계는 호스트 영상 파이프라인이 소유한다. 이 모듈은 엔진이
//! 의존하는 최소 인터페이스(프레임 소스, 호스트 조회)와, 외부 매크로
//! 평가 엔진과 공유하는 캡처 잠금 핸들을 정의한다.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::models::frame::CaptureResult;

/// 캡처 가능한 프레임 소스 — 호스트 파이프라인의 소스/장면 하나에 대응.
///
/// `capture_frame`은 블로킹이며 소요 시간은 호스트 캡처 기계의 계약이
/// 규정한다. 시도마다 정확히 하나의 [`CaptureResult`]를 반환한다.
pub trait FrameSource: Send + Sync {
    /// 소스 이름 (설정 저장/복원에 사용)
    fn name(&self) -> &str;

    /// 프레임 하나를 블로킹 캡처한다.
    ///
    /// 캡처 도중 소스가 무효가 되면 `completed = false`로 보고한다.
    fn capture_frame(&self) -> CaptureResult;
}

/// 호스트 영상 파이프라인 조회 인터페이스.
///
/// 메인 출력 핸들 제공과, 설정 복원 시 이름 → 소스/장면 해석을 담당한다.
pub trait VideoHost: Send + Sync {
    /// 프로그램/메인 출력의 캡처 핸들. 구성되지 않았으면 None.
    fn main_output(&self) -> Option<Arc<dyn FrameSource>>;

    /// 이름으로 캡처 소스 조회
    fn find_source(&self, name: &str) -> Option<Arc<dyn FrameSource>>;

    /// 이름으로 장면 조회
    fn find_scene(&self, name: &str) -> Option<Arc<dyn FrameSource>>;
}

/// 외부 매크로 평가 엔진과 공유하는 캡처 잠금 핸들.
///
/// 전역 잠금 대신 명시적 핸들로 전달하여 하위 시스템 간 결합을 타입에
/// 드러낸다. 해석+캡처 구간에서만 보유하고, 폴링 대기 구간에서는 절대
/// 보유하지 않는다 — 대기 내내 잠그면 외부 평가자가 주기만큼 통째로
/// 막힌다.
#[derive(Clone, Default)]
pub struct CaptureLock {
    inner: Arc<Mutex<()>>,
}

impl CaptureLock {
    /// 새 잠금 핸들 생성 (보통 외부 평가자가 생성해 넘긴다)
    pub fn new() -> Self {
        Self::default()
    }

    /// 잠금 획득. 반환된 가드가 캡처 호출의 능력 증명으로 쓰인다.
    pub fn lock(&self) -> CaptureGuard<'_> {
        CaptureGuard {
            _guard: self.inner.lock(),
        }
    }

    /// 비블로킹 획득 시도
    pub fn try_lock(&self) -> Option<CaptureGuard<'_>> {
        self.inner.try_lock().map(|g| CaptureGuard { _guard: g })
    }
}

/// 캡처 잠금 보유 증명.
///
/// 해석/캡처 호출 시그니처가 이 가드를 요구하여, 잠금 없이는 캡처가
/// 타입 수준에서 불가능하다.
pub struct CaptureGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}
