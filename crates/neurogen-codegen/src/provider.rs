// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fragment providers.
//!
//! Every projection is assembled slot by slot through a
//! [`FragmentProvider`]. The default provider produces the standard
//! generators of [`crate::projection`]; specialized variants (transposed
//! views, shared-weight filters, weight-sharing copies) override the
//! slots where their storage or semantics diverge and disable the slots
//! they cannot support. Structure slots returning an empty
//! [`Fragment::Ir`] tell the backend to render its built-in text.

use neurogen_ir::ast::{AccessIndex, AttrRef, Expr, Stmt};
use neurogen_ir::{Fragment, FragmentSlot};
use neurogen_model::Specialization;
use tracing::warn;

use crate::error::GenResult;
use crate::projection::{
    default_creating, default_post_event, default_psp, default_pruning, default_update_synapse,
    rate_psp, ProjectionCx,
};

pub trait FragmentProvider {
    /// Dispatch one slot. Behavior slots route through the overridable
    /// methods; everything else is a structure slot.
    fn fragment(&self, slot: FragmentSlot, cx: &ProjectionCx) -> GenResult<Fragment> {
        match slot {
            FragmentSlot::Psp => self.psp(cx),
            FragmentSlot::UpdateSynapse => self.update_synapse(cx),
            FragmentSlot::PostEvent => self.post_event(cx),
            FragmentSlot::Creating => self.creating(cx),
            FragmentSlot::Pruning => self.pruning(cx),
            FragmentSlot::Monitor => self.monitor(cx),
            FragmentSlot::SaveLoad => self.save_load(cx),
            other => self.structure(other, cx),
        }
    }

    fn psp(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        default_psp(cx)
    }

    fn update_synapse(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        default_update_synapse(cx)
    }

    fn post_event(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        default_post_event(cx)
    }

    fn creating(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        default_creating(cx)
    }

    fn pruning(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        default_pruning(cx)
    }

    fn monitor(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Ir(vec![]))
    }

    fn save_load(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Ir(vec![]))
    }

    fn structure(&self, _slot: FragmentSlot, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Ir(vec![]))
    }
}

pub fn provider_for(spec: &Specialization) -> Box<dyn FragmentProvider> {
    match spec {
        Specialization::Default => Box::new(DefaultProvider),
        Specialization::Transpose { forward } => Box::new(TransposeProvider { forward: *forward }),
        Specialization::SharedWeight { weights } => Box::new(SharedWeightProvider {
            weights: weights.clone(),
        }),
        Specialization::Copy { source } => Box::new(CopyProvider { source: *source }),
    }
}

pub struct DefaultProvider;

impl FragmentProvider for DefaultProvider {}

/// Read-only transposed view of a forward projection. No storage of its
/// own: delivery walks the forward connectivity backwards.
pub struct TransposeProvider {
    pub forward: usize,
}

impl FragmentProvider for TransposeProvider {
    fn psp(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        let f = self.forward;
        let pre = cx.pre.id;
        let post = cx.post.id;
        let target = &cx.proj.target;
        let id = cx.proj.id;
        Ok(Fragment::Verbatim(format!(
            "if (proj{id}._transmission) {{\n\
             \x20   for (int i = 0; i < proj{f}.post_rank.size(); i++) {{\n\
             \x20       for (int j = 0; j < proj{f}.pre_rank[i].size(); j++) {{\n\
             \x20           pop{post}._sum_{target}[proj{f}.pre_rank[i][j]] += \
             proj{f}.w[i][j] * pop{pre}.r[proj{f}.post_rank[i]];\n\
             \x20       }}\n\
             \x20   }}\n\
             }}\n"
        )))
    }

    fn update_synapse(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn post_event(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn creating(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn pruning(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn monitor(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        warn!(projection = %cx.proj.name, "transposed projections cannot be monitored");
        Ok(Fragment::Disabled)
    }

    fn save_load(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        warn!(projection = %cx.proj.name, "transposed projections have no save/load support");
        Ok(Fragment::Disabled)
    }

    fn structure(&self, _slot: FragmentSlot, _cx: &ProjectionCx) -> GenResult<Fragment> {
        // All state lives in the forward projection.
        Ok(Fragment::Disabled)
    }
}

/// One shared weight per column index, as used by filter banks: every
/// row applies the same kernel.
pub struct SharedWeightProvider {
    pub weights: Vec<f64>,
}

impl FragmentProvider for SharedWeightProvider {
    fn psp(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        let pre = cx.pre.id;
        let post = cx.post.id;
        let target = &cx.proj.target;
        let id = cx.proj.id;
        let ty = cx.config.precision.ctype();
        Ok(Fragment::Verbatim(format!(
            "if (proj{id}._transmission) {{\n\
             \x20   for (int i = 0; i < post_rank.size(); i++) {{\n\
             \x20       {ty} sum = 0.0;\n\
             \x20       for (int j = 0; j < pre_rank[i].size(); j++) {{\n\
             \x20           sum += w[j] * pop{pre}.r[pre_rank[i][j]];\n\
             \x20       }}\n\
             \x20       pop{post}._sum_{target}[post_rank[i]] += sum;\n\
             \x20   }}\n\
             }}\n"
        )))
    }

    fn update_synapse(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn creating(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn pruning(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn save_load(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        warn!(projection = %cx.proj.name, "shared-weight projections have no save/load support");
        Ok(Fragment::Disabled)
    }

    fn structure(&self, slot: FragmentSlot, cx: &ProjectionCx) -> GenResult<Fragment> {
        let ty = cx.config.precision.ctype();
        match slot {
            FragmentSlot::DeclareAttributes => Ok(Fragment::Verbatim(format!(
                "// shared kernel, one weight per column\nstd::vector<{ty}> w;\n"
            ))),
            FragmentSlot::InitAttributes => {
                let values: Vec<String> = self.weights.iter().map(|w| format!("{w:?}")).collect();
                Ok(Fragment::Verbatim(format!(
                    "w = std::vector<{ty}>{{ {} }};\n",
                    values.join(", ")
                )))
            }
            FragmentSlot::AccessAttributes => Ok(Fragment::Disabled),
            _ => Ok(Fragment::Ir(vec![])),
        }
    }
}

/// Reuses the weights of another projection with identical shape; only
/// the delivery loop is generated.
pub struct CopyProvider {
    pub source: usize,
}

impl FragmentProvider for CopyProvider {
    fn psp(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        let weight = Expr::attr(AttrRef::proj(self.source, "w", AccessIndex::Synapse));
        let body = rate_psp(cx, weight)?;
        Ok(Fragment::Ir(vec![Stmt::If {
            cond: Expr::attr(AttrRef::proj(
                cx.proj.id,
                "_transmission",
                AccessIndex::Scalar,
            )),
            then_branch: body,
            else_branch: vec![],
        }]))
    }

    fn update_synapse(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn post_event(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn creating(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn pruning(&self, _cx: &ProjectionCx) -> GenResult<Fragment> {
        Ok(Fragment::Disabled)
    }

    fn save_load(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        warn!(projection = %cx.proj.name, "copied projections save nothing of their own");
        Ok(Fragment::Disabled)
    }

    fn structure(&self, slot: FragmentSlot, _cx: &ProjectionCx) -> GenResult<Fragment> {
        match slot {
            // Connectivity is its own; the weights stay with the source.
            FragmentSlot::DeclareAttributes | FragmentSlot::InitAttributes => Ok(
                Fragment::Verbatim(format!("// weights shared with proj{}\n", self.source)),
            ),
            FragmentSlot::AccessAttributes => Ok(Fragment::Disabled),
            _ => Ok(Fragment::Ir(vec![])),
        }
    }

    fn monitor(&self, cx: &ProjectionCx) -> GenResult<Fragment> {
        warn!(projection = %cx.proj.name, "copied projections cannot be monitored");
        Ok(Fragment::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_config::GeneratorConfig;
    use neurogen_ir::{CppPrinter, RenderCtx};
    use neurogen_model::{
        Attribute, Connectivity, Equation, EquationKind, Locality, NetworkBuildContext,
        NeuronType, SynapseType,
    };

    fn rate_neuron() -> NeuronType {
        NeuronType {
            name: "Rate".into(),
            parameters: vec![],
            variables: vec![Attribute::variable(
                "r",
                Locality::Local,
                Equation {
                    kind: EquationKind::Assignment,
                    rhs: Expr::var("sum(exc)"),
                },
            )],
            spike: None,
        }
    }

    fn two_projections(second: Specialization) -> NetworkBuildContext {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![4], rate_neuron()).unwrap();
        let b = ctx.add_population("b", vec![4], rate_neuron()).unwrap();
        ctx.add_projection(
            "fwd",
            a,
            b,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(4, 4, 1.0),
            Specialization::Default,
        )
        .unwrap();
        ctx.add_projection(
            "special",
            b,
            a,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(4, 4, 1.0),
            second,
        )
        .unwrap();
        ctx
    }

    #[test]
    fn test_transpose_walks_forward_arrays() {
        let ctx = two_projections(Specialization::Transpose { forward: 0 });
        let cfg = GeneratorConfig::default();
        let plan = crate::projection::generate(
            &ctx.projections[1],
            &ctx.populations[1],
            &ctx.populations[0],
            &cfg,
        )
        .unwrap();
        let Fragment::Verbatim(text) = plan.fragment(neurogen_ir::FragmentSlot::Psp) else {
            panic!("transpose psp is verbatim");
        };
        assert!(text.contains("proj0.pre_rank[i][j]"));
        assert!(text.contains("pop0._sum_exc"));
        assert!(plan
            .fragment(neurogen_ir::FragmentSlot::SaveLoad)
            .is_disabled());
        assert!(plan
            .fragment(neurogen_ir::FragmentSlot::UpdateSynapse)
            .is_disabled());
    }

    #[test]
    fn test_copy_reads_source_weights() {
        let ctx = two_projections(Specialization::Copy { source: 0 });
        let cfg = GeneratorConfig::default();
        let plan = crate::projection::generate(
            &ctx.projections[1],
            &ctx.populations[1],
            &ctx.populations[0],
            &cfg,
        )
        .unwrap();
        let stmts = plan
            .fragment(neurogen_ir::FragmentSlot::Psp)
            .stmts()
            .unwrap();
        let text = CppPrinter::new("double", false).stmts(stmts, &RenderCtx::for_proj(1), 0);
        assert!(text.contains("proj0.w[i][j]"));
        assert!(text.contains("pop0._sum_exc[post_rank[i]] += sum;"));
    }

    #[test]
    fn test_shared_weight_declares_single_vector() {
        let ctx = two_projections(Specialization::SharedWeight {
            weights: vec![0.25, 0.5, 0.25],
        });
        let cfg = GeneratorConfig::default();
        let plan = crate::projection::generate(
            &ctx.projections[1],
            &ctx.populations[1],
            &ctx.populations[0],
            &cfg,
        )
        .unwrap();
        let Fragment::Verbatim(decl) =
            plan.fragment(neurogen_ir::FragmentSlot::DeclareAttributes)
        else {
            panic!("shared-weight declaration is verbatim");
        };
        assert!(decl.contains("std::vector<double> w;"));
        let Fragment::Verbatim(psp) = plan.fragment(neurogen_ir::FragmentSlot::Psp) else {
            panic!("shared-weight psp is verbatim");
        };
        assert!(psp.contains("w[j] * pop1.r[pre_rank[i][j]]"));
    }
}
