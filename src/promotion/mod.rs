// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Content view publishing and lifecycle promotion
//!
//! A content view version enters Library when published and then moves
//! forward one lifecycle environment at a time. The engine refuses to skip
//! environments or move backwards unless forced.

mod chain;
mod engine;
mod state;

pub use chain::LifecycleChain;
pub use engine::{
    ContentViewPlan, PromotionEngine, PromotionFailure, PromotionOutcome, PromotionPolicy,
    PromotionRequest, PromotionTransition, TransitionKind,
};
pub use state::{ContentViewState, PublishState};
