//! # CdkTsStack Controller
//!
//! A Kubernetes controller that treats AWS CDK stacks as declarative
//! custom resources. A `CdkTsStack` object describes a Git-hosted CDK
//! project and the AWS-side actions the controller may take; the
//! controller converges the real CloudFormation stack to match.
//!
//! ## Overview
//!
//! 1. **Event-driven reconciliation** - drives each resource through
//!    clone → install → deploy → steady-state, one observable phase
//!    transition per watch event, with a finalizer-governed destroy path.
//! 2. **Drift sweeper** - periodically runs `cdk drift` to detect AWS
//!    resources modified outside the CDK control plane. Detection only.
//! 3. **Git-sync sweeper** - periodically runs `cdk diff` against the
//!    latest Git revision and optionally auto-redeploys.
//! 4. **Lifecycle hooks** - user-supplied scripts at eight named stages
//!    with a documented environment contract; hook failures never wedge
//!    the controller.
//! 5. **Metric records** - line-JSON counters and gauges appended to a
//!    host-designated path.
//!
//! The status phase machine is the coordination primitive: sweepers claim
//! resources via owned phases, and a crash leaves a recoverable state that
//! the next reconcile resumes from.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;

pub use crd::{Actions, CdkTsStack, CdkTsStackSpec, CdkTsStackStatus, GitSource, LifecycleHooks, Phase, SourceSpec};
