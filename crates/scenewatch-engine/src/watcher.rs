//! 조건 워처 — 백그라운드 평가 루프의 동시성 조정.
//!
//! 상태 기계: Idle → Running → Stopping → Stopped (종료 상태).
//! 워처 인스턴스당 루프 스레드는 최대 하나이며, 캡처는 한 번에 하나만
//! 진행된다. 취소는 협조적이다 — 루프 진입 전과 대기 직후에 플래그를
//! 확인하고, 진행 중인 캡처나 매칭 호출을 선점하지 않는다.
//!
//! 루프 스레드는 UI 소유 상태를 직접 만지지 않는다. 결과는 단일 소비자
//! 채널에 게시되고 표시 스레드가 독점적으로 비운다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use scenewatch_core::models::frame::Region;
use scenewatch_core::models::outcome::{MatchOutcome, WatchUpdate};
use scenewatch_core::models::target::VideoTarget;
use scenewatch_core::ports::capture::{CaptureLock, VideoHost};
use scenewatch_vision::cascade::CascadeDetector;
use scenewatch_vision::ocr::OcrParameters;
use scenewatch_vision::overlay;
use scenewatch_vision::params::{AreaParameters, ObjectDetectParameters, PatternMatchParameters};
use scenewatch_vision::pattern::match_pattern;

use crate::capture;

// ============================================================
// 매칭 전략
// ============================================================

/// 구성된 매칭 전략과 그 파라미터.
///
/// 평가 자체는 호출마다 상태가 없다 — 유일한 예외는 OCR 파라미터가
/// 소유한 영속 엔진이고, 이 전략 값을 루프 스레드가 단독 소유하므로
/// 엔진 호출은 자연히 직렬화된다.
pub enum MatchStrategy {
    /// 패턴(템플릿) 매칭
    Pattern {
        pattern: RgbaImage,
        params: PatternMatchParameters,
    },
    /// 캐스케이드 객체 검출 (모델은 생성 시점에 로드 완료)
    Object {
        detector: CascadeDetector,
        params: ObjectDetectParameters,
    },
    /// OCR 텍스트 인식
    Text { params: OcrParameters },
}

impl MatchStrategy {
    /// 프레임 하나를 평가한다.
    pub fn evaluate(&self, frame: &RgbaImage) -> MatchOutcome {
        match self {
            MatchStrategy::Pattern { pattern, params } => {
                let surface = match_pattern(frame, pattern, params);
                let hits = surface.hits();
                if hits.is_empty() {
                    MatchOutcome::PatternFailure
                } else {
                    let regions = hits
                        .into_iter()
                        .map(|(x, y)| Region::new(x, y, pattern.width(), pattern.height()))
                        .collect();
                    MatchOutcome::PatternSuccess(regions)
                }
            }
            MatchStrategy::Object { detector, params } => {
                let regions = detector.detect(frame, params);
                if regions.is_empty() {
                    MatchOutcome::ObjectFailure
                } else {
                    MatchOutcome::ObjectSuccess(regions)
                }
            }
            MatchStrategy::Text { params } => params.recognize(frame),
        }
    }
}

/// 워처 한 세션의 구성
pub struct WatchTask {
    /// 캡처 대상
    pub target: VideoTarget,
    /// 매칭 전략
    pub strategy: MatchStrategy,
    /// 검사 영역 (활성 시 평가 전 크롭)
    pub area: AreaParameters,
    /// 폴링 주기
    pub poll_interval: Duration,
}

// ============================================================
// 워처
// ============================================================

/// 워처 상태 기계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// 취소 가능한 폴링 대기.
///
/// 내부 플래그가 wake와 wait 사이의 깨움 유실을 막는다.
struct PollWaiter {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl PollWaiter {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// 최대 `timeout`까지 대기. wake가 이미 호출됐으면 즉시 복귀.
    fn wait(&self, timeout: Duration) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cv.wait_for(&mut stopped, timeout);
        }
    }

    fn wake(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.cv.notify_all();
    }
}

/// 조건 워처.
///
/// `start()`는 멱등이다 — 이미 실행 중이면 아무 일도 하지 않는다.
/// `stop()`은 취소 플래그를 세우고 루프 스레드가 이를 관찰해 종료할
/// 때까지 호출자를 막는다(join). 워처 파괴 전 반드시 완료된다 —
/// 루프 스레드가 살아 있는 채로 워처가 해체되는 일은 없다.
pub struct ConditionWatcher {
    host: Arc<dyn VideoHost>,
    lock: CaptureLock,
    task: Option<WatchTask>,
    state: WatcherState,
    cancel: Arc<AtomicBool>,
    waiter: Arc<PollWaiter>,
    thread: Option<JoinHandle<()>>,
    tx: Sender<WatchUpdate>,
}

impl ConditionWatcher {
    /// 워처와 결과 수신 채널을 생성한다.
    ///
    /// `lock`은 외부 매크로 평가 엔진이 공급하는 공유 캡처 잠금이다.
    pub fn new(
        host: Arc<dyn VideoHost>,
        lock: CaptureLock,
        task: WatchTask,
    ) -> (Self, Receiver<WatchUpdate>) {
        let (tx, rx) = unbounded();
        (
            Self {
                host,
                lock,
                task: Some(task),
                state: WatcherState::Idle,
                cancel: Arc::new(AtomicBool::new(false)),
                waiter: Arc::new(PollWaiter::new()),
                thread: None,
                tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// 평가 루프 시작. 새로 시작했으면 true.
    ///
    /// 이미 실행 중이면 no-op (루프 스레드는 인스턴스당 최대 하나).
    /// 대상이 무효면 Running에 진입하지 않고 즉시 캡처 불가 결과를
    /// 게시하며 false를 반환한다. 종료된 워처는 재시작할 수 없다.
    pub fn start(&mut self) -> bool {
        match self.state {
            WatcherState::Running => {
                debug!("이미 실행 중, start 무시");
                return false;
            }
            WatcherState::Stopping | WatcherState::Stopped => {
                warn!("종료된 워처는 재시작할 수 없음");
                return false;
            }
            WatcherState::Idle => {}
        }

        let target_valid = self
            .task
            .as_ref()
            .is_some_and(|task| task.target.is_valid());
        if !target_valid {
            warn!("캡처 대상 무효, 시작 거부");
            let _ = self.tx.send(WatchUpdate::plain(MatchOutcome::CaptureFailed));
            return false;
        }
        let Some(task) = self.task.take() else {
            return false;
        };

        let _ = self.tx.send(WatchUpdate::plain(MatchOutcome::Loading));

        let host = self.host.clone();
        let lock = self.lock.clone();
        let cancel = self.cancel.clone();
        let waiter = self.waiter.clone();
        let tx = self.tx.clone();
        self.thread = Some(std::thread::spawn(move || {
            run_loop(task, host, lock, cancel, waiter, tx);
        }));
        self.state = WatcherState::Running;
        true
    }

    /// 평가 루프 정지. 루프 스레드가 완전히 종료될 때까지 블로킹한다.
    ///
    /// 진행 중인 캡처 하나와 남은 대기 구간만큼만 기다리면 되므로 항상
    /// 완료된다.
    pub fn stop(&mut self) {
        if self.state != WatcherState::Running {
            self.state = WatcherState::Stopped;
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.waiter.wake();
        self.state = WatcherState::Stopping;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("루프 스레드가 패닉으로 종료됨");
            }
        }
        self.state = WatcherState::Stopped;
        debug!("워처 정지 완료");
    }
}

impl Drop for ConditionWatcher {
    fn drop(&mut self) {
        // 루프 스레드가 살아 있는 채로 해체되지 않도록 보장
        self.stop();
    }
}

// ============================================================
// 평가 루프
// ============================================================

fn run_loop(
    task: WatchTask,
    host: Arc<dyn VideoHost>,
    lock: CaptureLock,
    cancel: Arc<AtomicBool>,
    waiter: Arc<PollWaiter>,
    tx: Sender<WatchUpdate>,
) {
    debug!(label = task.target.label(), "평가 루프 시작");

    // 취소 확인은 자원 획득 전(루프 조건)과 대기 직후(같은 조건)에
    // 일어난다. 진행 중인 캡처는 선점하지 않는다.
    while !cancel.load(Ordering::SeqCst) {
        // 공유 잠금은 해석+캡처 구간으로 한정한다. 대기까지 쥐고 있으면
        // 외부 평가자가 주기 내내 막힌다.
        let captured = {
            let guard = lock.lock();
            capture::resolve(&task.target, host.as_ref())
                .map(|source| capture::capture(source.as_ref(), &guard))
        };

        let update = match captured {
            None => WatchUpdate::plain(MatchOutcome::CaptureFailed),
            Some(result) if !result.completed => WatchUpdate::plain(MatchOutcome::CaptureFailed),
            Some(result) if result.is_empty() => WatchUpdate::plain(MatchOutcome::EmptyFrame),
            Some(result) => {
                let frame = match task.area.crop(&result.image) {
                    Some(cropped) => cropped,
                    None => result.image,
                };
                let outcome = task.strategy.evaluate(&frame);
                let annotated = overlay::render(&frame, &outcome);
                WatchUpdate::with_frame(outcome, annotated)
            }
        };

        // 회차 실패는 그 회차에 국한된다 — 루프는 stop() 전까지 계속
        if tx.send(update).is_err() {
            debug!("수신측 채널 닫힘, 결과 폐기");
        }

        waiter.wait(task.poll_interval);
    }

    debug!("평가 루프 종료");
}
