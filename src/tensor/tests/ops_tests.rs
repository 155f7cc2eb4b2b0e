use crate::tensor::Tensor;
use crate::utils::assert_panic;

#[test]
fn test_add_with_same_shape() {
    let a = Tensor::new(&[1., 2., 3., 4.], &[2, 2]);
    let b = Tensor::new(&[5., 6., 7., 8.], &[2, 2]);
    assert_eq!(&a + &b, Tensor::new(&[6., 8., 10., 12.], &[2, 2]));
}

#[test]
fn test_add_with_broadcast() {
    // [2, 3] + [3] -> 每一行都加上同一个向量
    let a = Tensor::new(&[1., 2., 3., 4., 5., 6.], &[2, 3]);
    let b = Tensor::new(&[10., 20., 30.], &[3]);
    assert_eq!(&a + &b, Tensor::new(&[11., 22., 33., 14., 25., 36.], &[2, 3]));
}

#[test]
fn test_add_with_incompatible_shape() {
    let a = Tensor::new(&[1., 2., 3.], &[3]);
    let b = Tensor::new(&[1., 2.], &[2]);
    assert_panic!(&a + &b);
}

#[test]
fn test_add_assign_accumulates() {
    let mut acc = Tensor::zeros(&[2]);
    acc += &Tensor::new(&[1., 2.], &[2]);
    acc += &Tensor::new(&[3., 4.], &[2]);
    assert_eq!(acc, Tensor::new(&[4., 6.], &[2]));
}

#[test]
fn test_sub_mul_and_scalar() {
    let a = Tensor::new(&[1., 2., 3.], &[3]);
    let b = Tensor::new(&[3., 2., 1.], &[3]);
    assert_eq!(&a - &b, Tensor::new(&[-2., 0., 2.], &[3]));
    assert_eq!(&a * &b, Tensor::new(&[3., 4., 3.], &[3]));
    assert_eq!(2.0 * &a, Tensor::new(&[2., 4., 6.], &[3]));
    assert_eq!(-&a, Tensor::new(&[-1., -2., -3.], &[3]));
}

#[test]
fn test_mat_mul() {
    let a = Tensor::new(&[1., 2., 3., 4., 5., 6.], &[2, 3]);
    let b = Tensor::new(&[1., 0., 0., 1., 1., 1.], &[3, 2]);
    assert_eq!(a.mat_mul(&b).unwrap(), Tensor::new(&[4., 5., 10., 11.], &[2, 2]));
    assert!(a.mat_mul(&a).is_err());
}

#[test]
fn test_sum_except_axis() {
    // [N=2, C=2, 1, 2]
    let t = Tensor::new(&[1., 2., 3., 4., 5., 6., 7., 8.], &[2, 2, 1, 2]);
    assert_eq!(t.sum_except_axis(1), Tensor::new(&[14., 22.], &[2]));
    assert_eq!(t.sum(), 36.);
}

#[test]
fn test_number() {
    assert_eq!(Tensor::new(&[3.5], &[1, 1]).number(), Some(3.5));
    assert_eq!(Tensor::new(&[1., 2.], &[2]).number(), None);
    assert!(Tensor::from(2.0) == 2.0);
}
