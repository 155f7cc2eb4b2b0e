/*
 * @Description  : 训练选项，可从JSON读取；缺省字段取默认值
 */

use serde::{Deserialize, Serialize};

use crate::nn::network::NetworkError;

/// 每个epoch的数据打乱方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shuffle {
    /// 训练开始前打乱一次
    Once,
    Never,
    EveryEpoch,
}

/// 学习率调度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearnRateSchedule {
    Constant,
    /// 每`drop_period`个epoch把学习率乘以`drop_factor`
    Piecewise { drop_factor: f32, drop_period: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub max_epochs: usize,
    pub mini_batch_size: usize,
    pub initial_learn_rate: f32,
    pub learn_rate_schedule: LearnRateSchedule,
    pub momentum: f32,
    pub l2_regularization: f32,
    pub shuffle: Shuffle,
    /// 每隔多少次迭代输出一次进度；0表示不输出
    pub verbose_frequency: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            max_epochs: 30,
            mini_batch_size: 128,
            initial_learn_rate: 0.01,
            learn_rate_schedule: LearnRateSchedule::Constant,
            momentum: 0.9,
            l2_regularization: 1e-4,
            shuffle: Shuffle::Once,
            verbose_frequency: 50,
            seed: None,
        }
    }
}

impl TrainingOptions {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        let invalid = |msg: &str| Err(NetworkError::InvalidOptions(msg.to_string()));
        if self.max_epochs == 0 {
            return invalid("max_epochs须≥1");
        }
        if self.mini_batch_size == 0 {
            return invalid("mini_batch_size须≥1");
        }
        if !(self.initial_learn_rate.is_finite() && self.initial_learn_rate > 0.0) {
            return invalid("initial_learn_rate须为正数");
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid("momentum须在[0, 1)内");
        }
        if !(self.l2_regularization.is_finite() && self.l2_regularization >= 0.0) {
            return invalid("l2_regularization须≥0");
        }
        if let LearnRateSchedule::Piecewise {
            drop_factor,
            drop_period,
        } = self.learn_rate_schedule
        {
            if !(0.0..=1.0).contains(&drop_factor) || drop_period == 0 {
                return invalid("piecewise调度要求drop_factor在[0, 1]内且drop_period≥1");
            }
        }
        Ok(())
    }

    /// 第`epoch`个epoch（从1开始）的学习率
    pub fn learn_rate_at(&self, epoch: usize) -> f32 {
        match self.learn_rate_schedule {
            LearnRateSchedule::Constant => self.initial_learn_rate,
            LearnRateSchedule::Piecewise {
                drop_factor,
                drop_period,
            } => {
                let drops = (epoch.saturating_sub(1) / drop_period.max(1)) as i32;
                self.initial_learn_rate * drop_factor.powi(drops)
            }
        }
    }
}
