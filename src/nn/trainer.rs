/*
 * @Description  : 训练循环：梯度 -> L2正则 -> SGDM -> 更新参数 -> 更新状态
 *
 * 停止标志只在两次迭代之间检查，一次迭代内部不会被打断。
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::data::{DataError, Dispatcher, InMemoryDispatcher};
use crate::nn::network::{DagNetwork, NetworkError, TrainingGradients};
use crate::nn::optimizer::{apply_l2_regularization, Sgdm, Solver};
use crate::nn::options::{Shuffle, TrainingOptions};
use crate::tensor::Tensor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    /// 每次迭代的小批量损失
    pub losses: Vec<f32>,
    pub epochs_completed: usize,
    /// 是否因停止标志提前结束
    pub stopped: bool,
}

impl TrainingSummary {
    pub fn iterations(&self) -> usize {
        self.losses.len()
    }

    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

#[derive(Debug)]
pub struct Trainer {
    options: TrainingOptions,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(options: TrainingOptions) -> Result<Self, NetworkError> {
        options.validate()?;
        Ok(Self {
            options,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub const fn options(&self) -> &TrainingOptions {
        &self.options
    }

    /// 置为`true`后，训练在下一次迭代开始前结束
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// 按选项中的批大小与种子构造内存分发器
    pub fn dispatcher(
        &self,
        inputs: Vec<Tensor>,
        targets: Vec<Tensor>,
    ) -> Result<InMemoryDispatcher, DataError> {
        let dispatcher = InMemoryDispatcher::new(inputs, targets, self.options.mini_batch_size)?;
        Ok(match self.options.seed {
            Some(seed) => dispatcher.seed(seed),
            None => dispatcher,
        })
    }

    pub fn train(
        &self,
        network: &mut DagNetwork,
        dispatcher: &mut dyn Dispatcher,
    ) -> Result<TrainingSummary, NetworkError> {
        let options = &self.options;
        let mut solver = Sgdm::new(options.momentum);
        let mut summary = TrainingSummary::default();

        network.compute_input_statistics(dispatcher)?;
        if options.shuffle == Shuffle::Once {
            dispatcher.shuffle();
        }
        log::info!(
            "开始训练：{}个观测，批大小{}，最多{}个epoch",
            dispatcher.num_observations(),
            dispatcher.mini_batch_size(),
            options.max_epochs
        );

        'epochs: for epoch in 1..=options.max_epochs {
            match options.shuffle {
                Shuffle::EveryEpoch => dispatcher.shuffle(),
                _ => dispatcher.start(),
            }
            let learn_rate = options.learn_rate_at(epoch);

            while let Some(batch) = dispatcher.next()? {
                if self.stop.load(Ordering::Relaxed) {
                    log::info!("收到停止信号，训练在第{}个epoch结束", epoch);
                    summary.stopped = true;
                    break 'epochs;
                }

                let TrainingGradients {
                    mut gradients,
                    loss,
                    state,
                    ..
                } = network.compute_gradients_for_training(&batch.inputs, &batch.targets)?;
                apply_l2_regularization(
                    &mut gradients,
                    &network.learnable_parameters(),
                    options.l2_regularization,
                )?;
                let deltas =
                    solver.calculate_update(&gradients, &network.learn_rate_factors(), learn_rate)?;
                network.update_learnable_parameters(&deltas)?;
                network.update_network_state(&state)?;

                summary.losses.push(loss);
                let iteration = summary.iterations();
                if options.verbose_frequency > 0 && iteration % options.verbose_frequency == 0 {
                    log::info!(
                        "epoch {} | 迭代 {} | 损失 {:.6} | 学习率 {}",
                        epoch,
                        iteration,
                        loss,
                        learn_rate
                    );
                }
            }
            summary.epochs_completed = epoch;
        }

        log::info!(
            "训练结束：{}次迭代，最终损失{:?}",
            summary.iterations(),
            summary.final_loss()
        );
        Ok(summary)
    }
}
