// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed AST for generated simulation code.
//!
//! Loop statements bind a fixed set of well-known scalars, mirroring the
//! index conventions of the emitted C++:
//!
//! - [`Stmt::ForNeurons`]: `i` (neuron rank)
//! - [`Stmt::ForPost`]: `i` (row in the connectivity list), `rk_post`
//! - [`Stmt::ForSynapses`]: `j` (synapse index in row `i`), `rk_pre`
//! - [`Stmt::ForSpikes`]: `rk_j` (spiking presynaptic rank)
//! - [`Stmt::ForInvPost`] / [`Stmt::ForPendingSpikes`]: `i`, `j`
//! - [`Stmt::ForPreCandidates`]: `rk_pre` (candidate presynaptic rank)

/// Scalar type of a declared attribute or loop local.
///
/// `Real` resolves to `float` or `double` at print time depending on the
/// configured precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Real,
    Int,
    Long,
    Bool,
}

/// Object owning an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Pop(usize),
    Proj(usize),
}

/// Delay depth of a redirected presynaptic read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelaySteps {
    /// Same delay for every synapse; the ring-buffer slot is `steps - 1`.
    Uniform(usize),
    /// Per-synapse delay; the slot is `delay[i][j] - 1`.
    PerSynapse,
}

/// How an attribute is indexed at its use site.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessIndex {
    /// Global attribute, one value per object.
    Scalar,
    /// Population attribute at the current neuron rank `i`.
    Neuron,
    /// Population attribute at an arbitrary rank expression.
    ///
    /// Expressing a cross-neuron read this way is what the
    /// parallel-independence check looks for.
    NeuronAt(Box<Expr>),
    /// Population attribute at `post_rank[i]`.
    PostNeuron,
    /// Population attribute at `pre_rank[i][j]`.
    PreNeuron,
    /// Semiglobal projection attribute at row `i`.
    PostIndexed,
    /// Local projection attribute at `[i][j]`.
    Synapse,
    /// Read redirected into the delayed-variable ring buffer.
    /// Produced by the delay-redirection pass, never written by hand.
    Delayed {
        base: Box<AccessIndex>,
        steps: DelaySteps,
    },
}

/// A typed attribute access.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRef {
    pub owner: Owner,
    pub name: String,
    pub index: AccessIndex,
}

impl AttrRef {
    pub fn pop(id: usize, name: impl Into<String>, index: AccessIndex) -> Self {
        Self {
            owner: Owner::Pop(id),
            name: name.into(),
            index,
        }
    }

    pub fn proj(id: usize, name: impl Into<String>, index: AccessIndex) -> Self {
        Self {
            owner: Owner::Proj(id),
            name: name.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Real(f64),
    Int(i64),
    Bool(bool),
    /// A scalar in the enclosing scope: a loop local (`sum`), a loop index
    /// (`i`, `j`, `rk_pre`, `rk_post`, `rk_j`) or a builtin (`t`, `dt`).
    Var(String),
    Attr(AttrRef),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Math function call (`exp`, `pow`, `fabs`, ...).
    Call(String, Vec<Expr>),
    /// A fresh `U(0,1)` draw, used by structural-plasticity probabilities.
    UniformDraw,
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn attr(r: AttrRef) -> Self {
        Expr::Attr(r)
    }

    pub fn neg(self) -> Self {
        Expr::Unary(UnOp::Neg, Box::new(self))
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Add, Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Sub, Box::new(self), Box::new(rhs))
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Mul, Box::new(self), Box::new(rhs))
    }

    pub fn div(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Div, Box::new(self), Box::new(rhs))
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Lt, Box::new(self), Box::new(rhs))
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Gt, Box::new(self), Box::new(rhs))
    }

    pub fn ge(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::Ge, Box::new(self), Box::new(rhs))
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::Binary(BinOp::And, Box::new(self), Box::new(rhs))
    }

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(func.into(), args)
    }
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Attr(AttrRef),
    Var(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

/// Statement tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    Local {
        name: String,
        ty: ScalarType,
        init: Option<Expr>,
    },
    Assign {
        target: LValue,
        op: AssignOp,
        value: Expr,
    },
    /// Post-write clamp of a value to declared bounds.
    Clamp {
        target: LValue,
        min: Option<Expr>,
        max: Option<Expr>,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    /// Loop over all neurons of a population; binds `i`.
    ForNeurons {
        pop: usize,
        parallel: bool,
        body: Vec<Stmt>,
    },
    /// Loop over the rows of the current projection; binds `i`, `rk_post`.
    ForPost {
        parallel: bool,
        body: Vec<Stmt>,
    },
    /// Inner loop over the synapses of row `i`; binds `j`, `rk_pre`.
    ForSynapses {
        body: Vec<Stmt>,
    },
    /// Loop over all candidate presynaptic ranks (synapse creation);
    /// binds `rk_pre`.
    ForPreCandidates {
        pop: usize,
        body: Vec<Stmt>,
    },
    /// Loop over a population's spike list of this step (optionally the
    /// uniformly delayed one); binds `rk_j`.
    ForSpikes {
        pop: usize,
        delay: Option<usize>,
        body: Vec<Stmt>,
    },
    /// Loop over the inverse-connectivity pairs of the spiking rank `rk_j`;
    /// binds `i`, `j`. Only valid inside [`Stmt::ForSpikes`].
    ForInvPost {
        body: Vec<Stmt>,
    },
    /// Loop over the postsynaptic spike list restricted to neurons that own
    /// a row in this projection; binds `rk_post`, `i`.
    ForPostSpikes {
        pop: usize,
        body: Vec<Stmt>,
    },
    /// Push this step's presynaptic spikes into the per-slot ring buffer
    /// (non-uniform spiking delay). Slot is `(idx_delay + delay[i][j] - 1)
    /// % max_delay`.
    EnqueueDelayedSpikes {
        pop: usize,
    },
    /// Drain the current ring-buffer slot, then clear it and advance
    /// `idx_delay`; binds `i`, `j`.
    ForPendingSpikes {
        body: Vec<Stmt>,
    },
    /// Insert a synapse `(i, rk_pre)` into the connectivity list.
    AddSynapse {
        weight: Expr,
        delay: Option<Expr>,
    },
    /// Remove synapse `j` of row `i`.
    RemoveSynapse,
    /// Verbatim target-language text supplied by a specialized provider.
    Raw(String),
}

impl Stmt {
    /// Child statement lists, for generic tree walks.
    pub fn children(&self) -> Vec<&Vec<Stmt>> {
        match self {
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => vec![then_branch, else_branch],
            Stmt::ForNeurons { body, .. }
            | Stmt::ForPost { body, .. }
            | Stmt::ForSynapses { body }
            | Stmt::ForPreCandidates { body, .. }
            | Stmt::ForSpikes { body, .. }
            | Stmt::ForInvPost { body }
            | Stmt::ForPostSpikes { body, .. }
            | Stmt::ForPendingSpikes { body } => vec![body],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_builders() {
        let e = Expr::var("x").mul(Expr::Real(2.0)).add(Expr::var("y"));
        match e {
            Expr::Binary(BinOp::Add, lhs, _) => {
                assert!(matches!(*lhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected expr: {other:?}"),
        }
    }

    #[test]
    fn test_children_walk() {
        let s = Stmt::ForPost {
            parallel: false,
            body: vec![Stmt::ForSynapses {
                body: vec![Stmt::Comment("inner".into())],
            }],
        };
        assert_eq!(s.children().len(), 1);
    }
}
