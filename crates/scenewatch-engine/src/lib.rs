//! # scenewatch-engine
//!
//! 조건 평가 루프 크레이트.
//! 설정된 캡처 대상을 주기적으로 해석·캡처하고, 구성된 매칭 전략으로
//! 평가한 뒤 결과를 표시 계층 채널로 넘긴다. 워처 인스턴스당 전용
//! 백그라운드 스레드 하나가 루프를 돌며, 캡처 구간은 외부 매크로 평가
//! 엔진과 공유하는 잠금으로 직렬화된다.

pub mod capture;
pub mod watcher;

pub use watcher::{ConditionWatcher, MatchStrategy, WatchTask, WatcherState};
