//! On-policy reinforcement learning in Rust.
//!
//! Stride consists of the following crates:
//!
//! * [stride-core](stride_core) runs the pipeline: an environment pool
//!   collects fixed-horizon trajectories, advantages are estimated with GAE
//!   (or `n`-step returns), and the policy is updated with the clipped
//!   surrogate objective of PPO or the trust-region step of TRPO. A
//!   checkpoint controller keeps the parameters with the best moving
//!   average of scores.
//! * [stride-policy-no-backend](stride_policy_no_backend) includes linear
//!   Gaussian and softmax policies and a linear value function with
//!   closed-form gradients, independent of any deep learning backend.
//! * [stride-toy-env](stride_toy_env) has small environments for tests and
//!   demos.
//! * [stride-tensorboard](stride_tensorboard) has `TensorboardRecorder` to
//!   write records which can be shown in Tensorboard.
//!
//! This crate re-exports them and is home to the demo programs.
pub use stride_core as core;
pub use stride_policy_no_backend as policy;
pub use stride_tensorboard as tensorboard;
pub use stride_toy_env as env;
