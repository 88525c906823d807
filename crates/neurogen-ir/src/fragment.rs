// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Named code-fragment slots.
//!
//! A generated population or projection is assembled from fragments keyed by
//! [`FragmentSlot`]. Specialized projection variants supply their own
//! [`Fragment`] for a slot before the default generator runs, and may
//! disable a slot they have no use for (e.g. a transposed projection has no
//! save/load support).

use crate::ast::Stmt;

/// The fragment slots a projection (and, where marked, a population)
/// is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentSlot {
    DeclareConnectivity,
    InitConnectivity,
    DeclareInverseConnectivity,
    InitInverseConnectivity,
    DeclareAttributes,
    InitAttributes,
    AccessAttributes,
    DeclareDelay,
    InitDelay,
    DeclareEventDriven,
    InitEventDriven,
    DeclareRng,
    InitRng,
    UpdateRng,
    Psp,
    UpdateSynapse,
    PostEvent,
    Creating,
    Pruning,
    StructAdditional,
    InitAdditional,
    AccessAdditional,
    SizeInBytes,
    Clear,
    Monitor,
    SaveLoad,
}

impl FragmentSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentSlot::DeclareConnectivity => "declare_connectivity_matrix",
            FragmentSlot::InitConnectivity => "init_connectivity_matrix",
            FragmentSlot::DeclareInverseConnectivity => "declare_inverse_connectivity_matrix",
            FragmentSlot::InitInverseConnectivity => "init_inverse_connectivity_matrix",
            FragmentSlot::DeclareAttributes => "declare_parameters_variables",
            FragmentSlot::InitAttributes => "init_parameters_variables",
            FragmentSlot::AccessAttributes => "access_parameters_variables",
            FragmentSlot::DeclareDelay => "declare_delay",
            FragmentSlot::InitDelay => "init_delay",
            FragmentSlot::DeclareEventDriven => "declare_event_driven",
            FragmentSlot::InitEventDriven => "init_event_driven",
            FragmentSlot::DeclareRng => "declare_rng",
            FragmentSlot::InitRng => "init_rng",
            FragmentSlot::UpdateRng => "update_rng",
            FragmentSlot::Psp => "psp_code",
            FragmentSlot::UpdateSynapse => "update_variables",
            FragmentSlot::PostEvent => "post_event",
            FragmentSlot::Creating => "creating",
            FragmentSlot::Pruning => "pruning",
            FragmentSlot::StructAdditional => "struct_additional",
            FragmentSlot::InitAdditional => "init_additional",
            FragmentSlot::AccessAdditional => "access_additional",
            FragmentSlot::SizeInBytes => "size_in_bytes",
            FragmentSlot::Clear => "clear",
            FragmentSlot::Monitor => "monitor",
            FragmentSlot::SaveLoad => "save_load",
        }
    }
}

/// The content of one fragment slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Structured statements, renderable by any printer and executable by
    /// the evaluator.
    Ir(Vec<Stmt>),
    /// Verbatim target-language text from a specialized provider.
    Verbatim(String),
    /// The slot is deliberately empty for this object.
    Disabled,
}

impl Fragment {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Fragment::Disabled)
    }

    /// True when rendering the fragment produces no code.
    pub fn is_empty(&self) -> bool {
        match self {
            Fragment::Ir(stmts) => stmts.is_empty(),
            Fragment::Verbatim(text) => text.trim().is_empty(),
            Fragment::Disabled => true,
        }
    }

    pub fn stmts(&self) -> Option<&[Stmt]> {
        match self {
            Fragment::Ir(stmts) => Some(stmts),
            _ => None,
        }
    }
}
