use crate::nn::{LearnRateSchedule, NetworkError, Shuffle, Trainer, TrainingOptions};
use crate::utils::assert_err;
use approx::assert_abs_diff_eq;

#[test]
fn test_options_from_json_fill_defaults() -> Result<(), serde_json::Error> {
    let options = TrainingOptions::from_json(
        r#"{
            "max_epochs": 5,
            "shuffle": "every_epoch",
            "learn_rate_schedule": {"type": "piecewise", "drop_factor": 0.5, "drop_period": 2}
        }"#,
    )?;
    assert_eq!(options.max_epochs, 5);
    assert_eq!(options.shuffle, Shuffle::EveryEpoch);
    assert_eq!(
        options.learn_rate_schedule,
        LearnRateSchedule::Piecewise {
            drop_factor: 0.5,
            drop_period: 2
        }
    );
    assert_eq!(options.mini_batch_size, 128);
    assert_eq!(options.seed, None);

    let restored = TrainingOptions::from_json(&options.to_json()?)?;
    assert_eq!(restored, options);
    Ok(())
}

#[test]
fn test_piecewise_learn_rate() {
    let options = TrainingOptions {
        learn_rate_schedule: LearnRateSchedule::Piecewise {
            drop_factor: 0.5,
            drop_period: 2,
        },
        ..Default::default()
    };
    assert_abs_diff_eq!(options.learn_rate_at(1), 0.01, epsilon = 1e-9);
    assert_abs_diff_eq!(options.learn_rate_at(2), 0.01, epsilon = 1e-9);
    assert_abs_diff_eq!(options.learn_rate_at(3), 0.005, epsilon = 1e-9);
    assert_abs_diff_eq!(options.learn_rate_at(5), 0.0025, epsilon = 1e-9);
    assert_eq!(TrainingOptions::default().learn_rate_at(7), 0.01);
}

#[test]
fn test_invalid_options_are_rejected() {
    let momentum = TrainingOptions {
        momentum: 1.0,
        ..Default::default()
    };
    assert_err!(momentum.validate(), NetworkError::InvalidOptions(_));
    assert_err!(Trainer::new(momentum), NetworkError::InvalidOptions(_));

    let batch = TrainingOptions {
        mini_batch_size: 0,
        ..Default::default()
    };
    assert_err!(batch.validate(), NetworkError::InvalidOptions(_));

    let schedule = TrainingOptions {
        learn_rate_schedule: LearnRateSchedule::Piecewise {
            drop_factor: 0.5,
            drop_period: 0,
        },
        ..Default::default()
    };
    assert_err!(schedule.validate(), NetworkError::InvalidOptions(_));
    assert!(TrainingOptions::default().validate().is_ok());
}
