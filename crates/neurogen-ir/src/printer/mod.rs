// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Backend printers rendering IR fragments to target-language source.

mod cpp;
mod cuda;

pub use cpp::CppPrinter;
pub use cuda::CudaPrinter;

/// Identity of the object a fragment belongs to, used to resolve attribute
/// accesses during rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderCtx {
    /// Projection the fragment is rendered inside, if any. Attributes of
    /// this projection are rendered bare (the emitted code lives inside the
    /// projection struct).
    pub proj: Option<usize>,
    /// Population the fragment is rendered inside, if any; same bare
    /// rendering rule.
    pub pop: Option<usize>,
}

impl RenderCtx {
    pub fn for_proj(id: usize) -> Self {
        Self {
            proj: Some(id),
            pop: None,
        }
    }

    pub fn for_pop(id: usize) -> Self {
        Self {
            proj: None,
            pop: Some(id),
        }
    }
}
