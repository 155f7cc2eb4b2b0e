//! InMemoryDispatcher 单元测试

use crate::data::{DataError, Dispatcher, InMemoryDispatcher};
use crate::tensor::Tensor;

fn toy_data(n: usize) -> (Tensor, Tensor) {
    let features = Tensor::new(&(0..2 * n).map(|x| x as f32).collect::<Vec<_>>(), &[n, 2]);
    let labels = Tensor::new(&(0..n).map(|x| x as f32).collect::<Vec<_>>(), &[n, 1]);
    (features, labels)
}

fn drain(dispatcher: &mut InMemoryDispatcher) -> Vec<Vec<usize>> {
    let mut batches = vec![];
    while let Some(batch) = dispatcher.next().unwrap() {
        batches.push(batch.indices);
    }
    batches
}

#[test]
fn test_dispatcher_basic() {
    let (x, y) = toy_data(10);
    let mut dispatcher = InMemoryDispatcher::new(vec![x], vec![y], 3).unwrap();
    assert_eq!(dispatcher.num_observations(), 10);
    assert_eq!(dispatcher.mini_batch_size(), 3);
    assert_eq!(dispatcher.num_batches(), 4); // 10 / 3 向上取整

    dispatcher.start();
    let first = dispatcher.next().unwrap().unwrap();
    assert_eq!(first.indices, vec![0, 1, 2]);
    assert_eq!(first.inputs[0], Tensor::new(&[0., 1., 2., 3., 4., 5.], &[3, 2]));
    assert_eq!(first.targets[0], Tensor::new(&[0., 1., 2.], &[3, 1]));

    let rest = drain(&mut dispatcher);
    assert_eq!(rest, vec![vec![3, 4, 5], vec![6, 7, 8], vec![9]]);
    assert!(dispatcher.is_done());
    assert!(dispatcher.next().unwrap().is_none());

    // start 回到开头
    dispatcher.start();
    assert!(!dispatcher.is_done());
    assert_eq!(drain(&mut dispatcher).len(), 4);
}

#[test]
fn test_dispatcher_drop_last() {
    let (x, y) = toy_data(10);
    let mut dispatcher = InMemoryDispatcher::new(vec![x], vec![y], 3)
        .unwrap()
        .drop_last(true);
    assert_eq!(dispatcher.num_batches(), 3);
    assert_eq!(drain(&mut dispatcher).len(), 3);
    assert!(dispatcher.is_done());
}

#[test]
fn test_dispatcher_shuffle_with_seed() {
    let (x, y) = toy_data(10);
    let mut d1 = InMemoryDispatcher::new(vec![x.clone()], vec![y.clone()], 4)
        .unwrap()
        .seed(42);
    let mut d2 = InMemoryDispatcher::new(vec![x], vec![y], 4).unwrap().seed(42);
    d1.shuffle();
    d2.shuffle();

    let b1 = drain(&mut d1);
    let b2 = drain(&mut d2);
    assert_eq!(b1, b2);

    // 打乱后仍是 0..10 的一个排列
    let mut all = b1.concat();
    all.sort_unstable();
    assert_eq!(all, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_dispatcher_batch_follows_indices() {
    let (x, y) = toy_data(6);
    let mut dispatcher = InMemoryDispatcher::new(vec![x], vec![y], 2).unwrap().seed(7);
    dispatcher.shuffle();
    while let Some(batch) = dispatcher.next().unwrap() {
        for (row, &obs) in batch.indices.iter().enumerate() {
            assert_eq!(batch.targets[0][[row, 0]], obs as f32);
            assert_eq!(batch.inputs[0][[row, 1]], (2 * obs + 1) as f32);
        }
    }
}

#[test]
fn test_dispatcher_mismatched_observations() {
    let (x, _) = toy_data(10);
    let (_, y) = toy_data(9);
    let err = InMemoryDispatcher::new(vec![x], vec![y], 3).unwrap_err();
    assert_eq!(
        err,
        DataError::MismatchedObservations {
            index: 1,
            expected: 10,
            got: 9,
        }
    );
}

#[test]
fn test_dispatcher_invalid_configuration() {
    let (x, y) = toy_data(4);
    assert_eq!(
        InMemoryDispatcher::new(vec![x], vec![y], 0).unwrap_err(),
        DataError::ZeroBatchSize
    );
    assert_eq!(
        InMemoryDispatcher::new(vec![], vec![], 2).unwrap_err(),
        DataError::EmptyDataset
    );
    assert_eq!(
        InMemoryDispatcher::new(vec![Tensor::zeros(&[0, 3])], vec![], 2).unwrap_err(),
        DataError::EmptyDataset
    );
}
