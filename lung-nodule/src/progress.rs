//! 进度汇报与中止.
//!
//! 进度是单向通知: 观察者不能影响计算结果, 但可以通过 [`AbortHandle`] 请求中止.
//! 中止标志只在固定的检查点被读取.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{SegError, SegResult};

/// 流水线阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    /// 按 ROI 裁剪.
    Crop,

    /// 各向同性重采样.
    Resample,

    /// 计算某个特征图. 参数为生成器名称.
    Feature(&'static str),

    /// 聚合为速度函数.
    Aggregate,

    /// 快速行进初始化.
    FastMarching,

    /// 测地线活动轮廓演化.
    Evolution,

    /// 完成.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crop => f.write_str("cropping region of interest"),
            Self::Resample => f.write_str("resampling"),
            Self::Feature(name) => write!(f, "computing {name} feature"),
            Self::Aggregate => f.write_str("aggregating features"),
            Self::FastMarching => f.write_str("fast marching"),
            Self::Evolution => f.write_str("evolving level set"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// 一次进度通知.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Progress {
    /// 当前阶段.
    pub stage: Stage,

    /// 当前阶段完成比例, `[0, 1]`.
    pub fraction: f64,
}

/// 进度观察者. 任何 `FnMut(&Progress)` 闭包都是观察者.
pub trait ProgressObserver {
    /// 收到一次进度通知. 不应阻塞.
    fn on_progress(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    #[inline]
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// 可跨线程共享的中止标志.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// 新的未中止标志.
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求中止.
    #[inline]
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 是否已请求中止.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 清除中止请求.
    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 一次运行的上下文: 进度观察者 + 中止标志.
pub struct RunContext<'a> {
    observer: Option<&'a mut dyn ProgressObserver>,
    abort: AbortHandle,
}

impl<'a> RunContext<'a> {
    /// 创建上下文.
    pub fn new(observer: Option<&'a mut dyn ProgressObserver>, abort: AbortHandle) -> Self {
        Self { observer, abort }
    }

    /// 不汇报进度, 也永不中止.
    pub fn silent() -> Self {
        Self::new(None, AbortHandle::new())
    }

    /// 汇报进度.
    pub fn report(&mut self, stage: Stage, fraction: f64) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_progress(&Progress {
                stage,
                fraction: fraction.clamp(0.0, 1.0),
            });
        }
    }

    /// 若已请求中止, 返回 `SegError::Cancelled`.
    #[inline]
    pub fn check_abort(&self) -> SegResult<()> {
        if self.abort.is_aborted() {
            Err(SegError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 中止标志.
    #[inline]
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_observer_and_abort() {
        let abort = AbortHandle::new();
        let remote = abort.clone();
        let mut stages = Vec::new();
        let mut observer = |p: &Progress| {
            stages.push(p.stage);
            if p.stage == Stage::FastMarching {
                remote.abort();
            }
        };
        let mut ctx = RunContext::new(Some(&mut observer), abort.clone());
        ctx.report(Stage::Crop, 2.0);
        assert!(ctx.check_abort().is_ok());
        ctx.report(Stage::FastMarching, 1.0);
        assert!(ctx.check_abort().unwrap_err().is_cancelled());
        drop(ctx);

        assert_eq!(stages, vec![Stage::Crop, Stage::FastMarching]);
        abort.reset();
        assert!(!abort.is_aborted());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Feature("sigmoid").to_string(), "computing sigmoid feature");
    }
}
