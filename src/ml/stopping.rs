//! 検証精度に基づくチェックポイントと早期終了
//!
//! どちらも「直前までの最良値より厳密に大きいか」で改善を判定します。
//! NaN は改善とみなしません。

/// 最良値を更新したエポックを記録する
#[derive(Debug, Clone, Default)]
pub struct BestCheckpoint {
    best: Option<f64>,
    best_epoch: usize,
}

impl BestCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// 改善した場合 true（このエポックのモデルを保存すべき）
    pub fn observe(&mut self, epoch: usize, metric: f64) -> bool {
        if improves(self.best, metric) {
            self.best = Some(metric);
            self.best_epoch = epoch;
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

/// `patience` エポック連続で改善しなければ停止を指示する
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    /// 停止すべきなら true
    pub fn observe(&mut self, metric: f64) -> bool {
        if improves(self.best, metric) {
            self.best = Some(metric);
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.wait
    }
}

/// 1エポック分の判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochDecision {
    /// 最良値を更新した（チェックポイントを書き出す）
    pub improved: bool,
    /// 早期終了する
    pub stop: bool,
}

/// 学習ループの結果
#[derive(Debug, Clone)]
pub struct MonitorOutcome<M> {
    /// 最良エポックのモデル（改善が一度も無ければ最後のモデル）
    pub model: M,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_metric: f64,
    pub stopped_early: bool,
}

/// チェックポイントと早期終了をまとめ、最良エポックのモデルを保持する
#[derive(Debug, Clone)]
pub struct TrainingMonitor<M> {
    checkpoint: BestCheckpoint,
    early_stopping: EarlyStopping,
    best_model: Option<M>,
    epochs_run: usize,
    stopped_early: bool,
}

impl<M> TrainingMonitor<M> {
    pub fn new(patience: usize) -> Self {
        Self {
            checkpoint: BestCheckpoint::new(),
            early_stopping: EarlyStopping::new(patience),
            best_model: None,
            epochs_run: 0,
            stopped_early: false,
        }
    }

    /// エポック終了時に呼ぶ。改善した場合だけ `model` を保持する
    pub fn observe(&mut self, epoch: usize, metric: f64, model: M) -> EpochDecision {
        self.epochs_run = epoch;
        let improved = self.checkpoint.observe(epoch, metric);
        if improved {
            self.best_model = Some(model);
        }
        let stop = self.early_stopping.observe(metric);
        self.stopped_early = stop;
        EpochDecision { improved, stop }
    }

    pub fn best_model(&self) -> Option<&M> {
        self.best_model.as_ref()
    }

    pub fn finish(self, last: impl FnOnce() -> M) -> MonitorOutcome<M> {
        MonitorOutcome {
            model: match self.best_model {
                Some(model) => model,
                None => last(),
            },
            epochs_run: self.epochs_run,
            best_epoch: self.checkpoint.best_epoch(),
            best_metric: self.checkpoint.best().unwrap_or(0.0),
            stopped_early: self.stopped_early,
        }
    }
}

fn improves(best: Option<f64>, metric: f64) -> bool {
    if metric.is_nan() {
        return false;
    }
    match best {
        None => true,
        Some(b) => metric > b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_only_on_strict_improvement() {
        let mut ckpt = BestCheckpoint::new();
        assert!(ckpt.observe(1, 0.5));
        assert!(!ckpt.observe(2, 0.5));
        assert!(ckpt.observe(3, 0.6));
        assert!(!ckpt.observe(4, 0.55));
        assert_eq!(ckpt.best(), Some(0.6));
        assert_eq!(ckpt.best_epoch(), 3);
    }

    #[test]
    fn test_first_epoch_always_checkpoints_even_at_zero() {
        let mut ckpt = BestCheckpoint::new();
        assert!(ckpt.observe(1, 0.0));
    }

    #[test]
    fn test_early_stop_after_patience() {
        let mut stop = EarlyStopping::new(5);
        assert!(!stop.observe(0.70));
        for _ in 0..4 {
            assert!(!stop.observe(0.65));
        }
        assert_eq!(stop.epochs_without_improvement(), 4);
        assert!(stop.observe(0.70));
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut stop = EarlyStopping::new(2);
        stop.observe(0.1);
        assert!(!stop.observe(0.1));
        assert!(!stop.observe(0.2));
        assert!(!stop.observe(0.2));
        assert!(stop.observe(0.15));
    }

    #[test]
    fn test_monitor_restores_best_model_after_early_stop() {
        let accuracies = [0.5, 0.7, 0.6, 0.65, 0.7, 0.9];
        let mut monitor = TrainingMonitor::new(3);
        let mut decisions = Vec::new();

        for (i, &acc) in accuracies.iter().enumerate() {
            let epoch = i + 1;
            let decision = monitor.observe(epoch, acc, format!("epoch{}", epoch));
            decisions.push(decision);
            if decision.stop {
                break;
            }
        }

        let improved: Vec<bool> = decisions.iter().map(|d| d.improved).collect();
        assert_eq!(improved, vec![true, true, false, false, false]);
        assert_eq!(monitor.best_model().map(String::as_str), Some("epoch2"));

        let outcome = monitor.finish(|| "last".to_string());
        assert_eq!(outcome.model, "epoch2");
        assert_eq!(outcome.epochs_run, 5);
        assert_eq!(outcome.best_epoch, 2);
        assert_eq!(outcome.best_metric, 0.7);
        assert!(outcome.stopped_early);
    }

    #[test]
    fn test_monitor_without_improvement_keeps_last_model() {
        let mut monitor = TrainingMonitor::new(10);
        assert!(!monitor.observe(1, f64::NAN, 1).improved);
        assert!(!monitor.observe(2, f64::NAN, 2).improved);

        let outcome = monitor.finish(|| 99);
        assert_eq!(outcome.model, 99);
        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.best_metric, 0.0);
        assert!(!outcome.stopped_early);
    }

    #[test]
    fn test_nan_is_not_improvement() {
        let mut ckpt = BestCheckpoint::new();
        assert!(!ckpt.observe(1, f64::NAN));
        let mut stop = EarlyStopping::new(1);
        assert!(stop.observe(f64::NAN));
    }
}
