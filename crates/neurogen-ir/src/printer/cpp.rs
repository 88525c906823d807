// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! C++ printer with optional OpenMP parallel-for emission.
//!
//! The output shapes follow the reference single-thread/OpenMP templates:
//! list-of-list connectivity loops with `i`/`j` indices, `post_rank[i]` /
//! `pre_rank[i][j]` rank lookups, and `_delayed_<var>[slot][rank]` ring
//! buffer reads.

use crate::ast::{
    AccessIndex, AssignOp, AttrRef, BinOp, DelaySteps, Expr, LValue, Owner, ScalarType, Stmt, UnOp,
};
use crate::fragment::Fragment;
use crate::printer::RenderCtx;

/// Renders IR fragments to C++ source text.
#[derive(Debug, Clone)]
pub struct CppPrinter {
    /// C type used for `ScalarType::Real`.
    pub real_ctype: &'static str,
    /// Whether parallel loops carry `#pragma omp parallel for`.
    pub openmp: bool,
}

impl CppPrinter {
    pub fn new(real_ctype: &'static str, openmp: bool) -> Self {
        Self { real_ctype, openmp }
    }

    /// Render a whole fragment at the given indentation depth.
    pub fn fragment(&self, fragment: &Fragment, ctx: &RenderCtx, indent: usize) -> String {
        match fragment {
            Fragment::Ir(stmts) => self.stmts(stmts, ctx, indent),
            Fragment::Verbatim(text) => text.clone(),
            Fragment::Disabled => String::new(),
        }
    }

    pub fn stmts(&self, stmts: &[Stmt], ctx: &RenderCtx, indent: usize) -> String {
        let mut out = String::new();
        for stmt in stmts {
            self.stmt(stmt, ctx, indent, &mut out);
        }
        out
    }

    pub fn ctype(&self, ty: ScalarType) -> &'static str {
        match ty {
            ScalarType::Real => self.real_ctype,
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::Bool => "bool",
        }
    }

    fn stmt(&self, stmt: &Stmt, ctx: &RenderCtx, indent: usize, out: &mut String) {
        let pad = "    ".repeat(indent);
        match stmt {
            Stmt::Comment(text) => {
                out.push_str(&format!("{pad}// {text}\n"));
            }
            Stmt::Local { name, ty, init } => match init {
                Some(e) => out.push_str(&format!(
                    "{pad}{} {name} = {};\n",
                    self.ctype(*ty),
                    self.expr(e, ctx)
                )),
                None => out.push_str(&format!("{pad}{} {name};\n", self.ctype(*ty))),
            },
            Stmt::Assign { target, op, value } => {
                let lhs = self.lvalue(target, ctx);
                let rhs = self.expr(value, ctx);
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::Add => "+=",
                    AssignOp::Sub => "-=",
                    AssignOp::Mul => "*=",
                    AssignOp::Div => "/=",
                };
                out.push_str(&format!("{pad}{lhs} {op} {rhs};\n"));
            }
            Stmt::Clamp { target, min, max } => {
                let lhs = self.lvalue(target, ctx);
                if let Some(m) = min {
                    let m = self.expr(m, ctx);
                    out.push_str(&format!("{pad}if ({lhs} < {m})\n{pad}    {lhs} = {m};\n"));
                }
                if let Some(m) = max {
                    let m = self.expr(m, ctx);
                    out.push_str(&format!("{pad}if ({lhs} > {m})\n{pad}    {lhs} = {m};\n"));
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                out.push_str(&format!("{pad}if ({}) {{\n", self.expr(cond, ctx)));
                out.push_str(&self.stmts(then_branch, ctx, indent + 1));
                if else_branch.is_empty() {
                    out.push_str(&format!("{pad}}}\n"));
                } else {
                    out.push_str(&format!("{pad}}} else {{\n"));
                    out.push_str(&self.stmts(else_branch, ctx, indent + 1));
                    out.push_str(&format!("{pad}}}\n"));
                }
            }
            Stmt::ForNeurons {
                pop,
                parallel,
                body,
            } => {
                if *parallel && self.openmp {
                    out.push_str(&format!("{pad}#pragma omp parallel for\n"));
                }
                out.push_str(&format!(
                    "{pad}for (int i = 0; i < pop{pop}.size; i++) {{\n"
                ));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForPost { parallel, body } => {
                if *parallel && self.openmp {
                    out.push_str(&format!("{pad}#pragma omp parallel for\n"));
                }
                out.push_str(&format!(
                    "{pad}for (int i = 0; i < post_rank.size(); i++) {{\n"
                ));
                out.push_str(&format!("{pad}    int rk_post = post_rank[i];\n"));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForSynapses { body } => {
                out.push_str(&format!(
                    "{pad}for (int j = 0; j < pre_rank[i].size(); j++) {{\n"
                ));
                out.push_str(&format!("{pad}    int rk_pre = pre_rank[i][j];\n"));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForPreCandidates { pop, body } => {
                out.push_str(&format!(
                    "{pad}for (int rk_pre = 0; rk_pre < pop{pop}.size; rk_pre++) {{\n"
                ));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForSpikes { pop, delay, body } => {
                let pre_array = match delay {
                    Some(d) => format!("pop{pop}._delayed_spike[{}]", d.saturating_sub(1)),
                    None => format!("pop{pop}.spiked"),
                };
                out.push_str(&format!(
                    "{pad}for (int _idx_j = 0; _idx_j < {pre_array}.size(); _idx_j++) {{\n"
                ));
                out.push_str(&format!("{pad}    int rk_j = {pre_array}[_idx_j];\n"));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForInvPost { body } => {
                out.push_str(&format!(
                    "{pad}auto inv_post_ptr = inv_pre_rank.find(rk_j);\n"
                ));
                out.push_str(&format!(
                    "{pad}if (inv_post_ptr == inv_pre_rank.end())\n{pad}    continue;\n"
                ));
                out.push_str(&format!(
                    "{pad}std::vector< std::pair<int, int> >& inv_post = inv_post_ptr->second;\n"
                ));
                out.push_str(&format!(
                    "{pad}for (int _idx_i = 0; _idx_i < inv_post.size(); _idx_i++) {{\n"
                ));
                out.push_str(&format!("{pad}    int i = inv_post[_idx_i].first;\n"));
                out.push_str(&format!("{pad}    int j = inv_post[_idx_i].second;\n"));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::ForPostSpikes { pop, body } => {
                out.push_str(&format!(
                    "{pad}for (int _idx_i = 0; _idx_i < pop{pop}.spiked.size(); _idx_i++) {{\n"
                ));
                out.push_str(&format!("{pad}    int rk_post = pop{pop}.spiked[_idx_i];\n"));
                out.push_str(&format!(
                    "{pad}    auto row_it = inv_post_rank.find(rk_post);\n"
                ));
                out.push_str(&format!(
                    "{pad}    if (row_it == inv_post_rank.end())\n{pad}        continue;\n"
                ));
                out.push_str(&format!("{pad}    int i = row_it->second;\n"));
                out.push_str(&self.stmts(body, ctx, indent + 1));
                out.push_str(&format!("{pad}}}\n"));
            }
            Stmt::EnqueueDelayedSpikes { pop } => {
                out.push_str(&format!(
                    "{pad}for (int _idx_spike = 0; _idx_spike < pop{pop}.spiked.size(); _idx_spike++) {{\n\
                     {pad}    int rk_pre = pop{pop}.spiked[_idx_spike];\n\
                     {pad}    auto it = inv_pre_rank.find(rk_pre);\n\
                     {pad}    if (it == inv_pre_rank.end())\n\
                     {pad}        continue;\n\
                     {pad}    for (auto& pr : it->second) {{\n\
                     {pad}        int d = delay[pr.first][pr.second] - 1;\n\
                     {pad}        _delayed_spikes[(idx_delay + d) % max_delay][pr.first].push_back(pr.second);\n\
                     {pad}    }}\n\
                     {pad}}}\n"
                ));
            }
            Stmt::ForPendingSpikes { body } => {
                out.push_str(&format!(
                    "{pad}for (int i = 0; i < _delayed_spikes[idx_delay].size(); i++) {{\n"
                ));
                out.push_str(&format!(
                    "{pad}    for (int _idx_j = 0; _idx_j < _delayed_spikes[idx_delay][i].size(); _idx_j++) {{\n"
                ));
                out.push_str(&format!(
                    "{pad}        int j = _delayed_spikes[idx_delay][i][_idx_j];\n"
                ));
                out.push_str(&self.stmts(body, ctx, indent + 2));
                out.push_str(&format!("{pad}    }}\n"));
                out.push_str(&format!("{pad}    _delayed_spikes[idx_delay][i].clear();\n"));
                out.push_str(&format!("{pad}}}\n"));
                out.push_str(&format!("{pad}idx_delay = (idx_delay + 1) % max_delay;\n"));
            }
            Stmt::AddSynapse { weight, delay } => {
                let w = self.expr(weight, ctx);
                match delay {
                    Some(d) => out.push_str(&format!(
                        "{pad}addSynapse(i, rk_pre, {w}, {});\n",
                        self.expr(d, ctx)
                    )),
                    None => out.push_str(&format!("{pad}addSynapse(i, rk_pre, {w});\n")),
                }
            }
            Stmt::RemoveSynapse => {
                out.push_str(&format!("{pad}removeSynapse(i, j);\n"));
            }
            Stmt::Raw(text) => {
                for line in text.lines() {
                    out.push_str(&format!("{pad}{line}\n"));
                }
            }
        }
    }

    fn lvalue(&self, lv: &LValue, ctx: &RenderCtx) -> String {
        match lv {
            LValue::Attr(attr) => self.attr(attr, ctx),
            LValue::Var(name) => name.clone(),
        }
    }

    pub fn attr(&self, attr: &AttrRef, ctx: &RenderCtx) -> String {
        match attr.owner {
            Owner::Pop(p) => {
                // Inside its own struct the population's members are bare.
                let base = if ctx.pop == Some(p) {
                    attr.name.clone()
                } else {
                    format!("pop{p}.{}", attr.name)
                };
                match &attr.index {
                    AccessIndex::Scalar => base,
                    AccessIndex::Neuron => format!("{base}[i]"),
                    AccessIndex::NeuronAt(e) => format!("{base}[{}]", self.expr(e, ctx)),
                    AccessIndex::PostNeuron => format!("{base}[post_rank[i]]"),
                    AccessIndex::PreNeuron => format!("{base}[pre_rank[i][j]]"),
                    AccessIndex::Delayed { base: b, steps } => {
                        let slot = match steps {
                            DelaySteps::Uniform(d) => format!("{}", d.saturating_sub(1)),
                            DelaySteps::PerSynapse => "delay[i][j]-1".to_string(),
                        };
                        let buf = format!("pop{p}._delayed_{}[{slot}]", attr.name);
                        match &**b {
                            AccessIndex::Scalar => buf,
                            AccessIndex::PreNeuron => format!("{buf}[pre_rank[i][j]]"),
                            AccessIndex::Neuron => format!("{buf}[i]"),
                            other => panic!("unsupported delayed base access: {other:?}"),
                        }
                    }
                    other => panic!("unsupported population access: {other:?}"),
                }
            }
            Owner::Proj(id) => {
                // Inside its own struct the projection's members are bare.
                let base = if ctx.proj == Some(id) {
                    attr.name.clone()
                } else {
                    format!("proj{id}.{}", attr.name)
                };
                match &attr.index {
                    AccessIndex::Scalar => base,
                    AccessIndex::PostIndexed => format!("{base}[i]"),
                    AccessIndex::Synapse => format!("{base}[i][j]"),
                    other => panic!("unsupported projection access: {other:?}"),
                }
            }
        }
    }

    pub fn expr(&self, expr: &Expr, ctx: &RenderCtx) -> String {
        match expr {
            Expr::Real(v) => format!("{v:?}"),
            Expr::Int(v) => format!("{v}"),
            Expr::Bool(v) => format!("{v}"),
            Expr::Var(name) => name.clone(),
            Expr::Attr(attr) => self.attr(attr, ctx),
            Expr::Unary(op, e) => {
                let inner = self.expr(e, ctx);
                match op {
                    UnOp::Neg => format!("(-{inner})"),
                    UnOp::Not => format!("(!{inner})"),
                }
            }
            Expr::Binary(op, a, b) => {
                let a = self.expr(a, ctx);
                let b = self.expr(b, ctx);
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                };
                format!("({a} {op} {b})")
            }
            Expr::Call(func, args) => {
                // Live synapse count of the current row.
                if func == "row_size" && args.is_empty() {
                    return "pre_rank[i].size()".to_string();
                }
                let args: Vec<String> = args.iter().map(|a| self.expr(a, ctx)).collect();
                format!("{func}({})", args.join(", "))
            }
            Expr::UniformDraw => "unif(rng[0])".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer() -> CppPrinter {
        CppPrinter::new("double", false)
    }

    #[test]
    fn test_rate_psp_rendering() {
        // sum += w[i][j] * pop0.r[pre_rank[i][j]];
        let stmt = Stmt::ForPost {
            parallel: false,
            body: vec![
                Stmt::Local {
                    name: "sum".into(),
                    ty: ScalarType::Real,
                    init: Some(Expr::Real(0.0)),
                },
                Stmt::ForSynapses {
                    body: vec![Stmt::Assign {
                        target: LValue::Var("sum".into()),
                        op: AssignOp::Add,
                        value: Expr::Attr(AttrRef::proj(2, "w", AccessIndex::Synapse)).mul(
                            Expr::Attr(AttrRef::pop(0, "r", AccessIndex::PreNeuron)),
                        ),
                    }],
                },
                Stmt::Assign {
                    target: LValue::Attr(AttrRef::pop(1, "_sum_exc", AccessIndex::PostNeuron)),
                    op: AssignOp::Add,
                    value: Expr::var("sum"),
                },
            ],
        };
        let code = printer().stmts(&[stmt], &RenderCtx::for_proj(2), 0);
        assert!(code.contains("for (int i = 0; i < post_rank.size(); i++)"));
        assert!(code.contains("sum += (w[i][j] * pop0.r[pre_rank[i][j]]);"));
        assert!(code.contains("pop1._sum_exc[post_rank[i]] += sum;"));
    }

    #[test]
    fn test_delayed_access_rendering() {
        let attr = AttrRef::pop(
            0,
            "r",
            AccessIndex::Delayed {
                base: Box::new(AccessIndex::PreNeuron),
                steps: DelaySteps::Uniform(3),
            },
        );
        assert_eq!(
            printer().attr(&attr, &RenderCtx::default()),
            "pop0._delayed_r[2][pre_rank[i][j]]"
        );

        let attr = AttrRef::pop(
            0,
            "r",
            AccessIndex::Delayed {
                base: Box::new(AccessIndex::PreNeuron),
                steps: DelaySteps::PerSynapse,
            },
        );
        assert_eq!(
            printer().attr(&attr, &RenderCtx::default()),
            "pop0._delayed_r[delay[i][j]-1][pre_rank[i][j]]"
        );
    }

    #[test]
    fn test_openmp_pragma_emission() {
        let stmt = Stmt::ForNeurons {
            pop: 0,
            parallel: true,
            body: vec![],
        };
        let parallel = CppPrinter::new("double", true).stmts(
            std::slice::from_ref(&stmt),
            &RenderCtx::default(),
            0,
        );
        assert!(parallel.contains("#pragma omp parallel for"));
        let sequential = printer().stmts(&[stmt], &RenderCtx::default(), 0);
        assert!(!sequential.contains("#pragma"));
    }

    #[test]
    fn test_clamp_rendering() {
        let stmt = Stmt::Clamp {
            target: LValue::Attr(AttrRef::proj(0, "w", AccessIndex::Synapse)),
            min: Some(Expr::Real(0.0)),
            max: Some(Expr::Real(1.0)),
        };
        let code = printer().stmts(&[stmt], &RenderCtx::for_proj(0), 0);
        assert!(code.contains("if (w[i][j] < 0.0)"));
        assert!(code.contains("if (w[i][j] > 1.0)"));
    }
}
