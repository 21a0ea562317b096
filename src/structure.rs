//! Control-Flow Structurer: lifts a subroutine's [BasicBlock] graph
//! into a tree of [Stmt] blocks — if/else, while, do-while, for, switch,
//! break, continue — using dominance and natural-loop analysis.
//!
//! Grounded on `petgraph::algo::dominators`, the same crate already used by
//! the Call-Graph Builder for exactly this kind of graph-algorithm
//! need.

use crate::ast::{Case, CaseLabel, Expr, Stmt};
use crate::consts::LOC_PREFIX;
use crate::error::Diagnostic;
use crate::instruction::Offset;
use crate::simulate::{BasicBlock, Terminator};
use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

fn label_name(offset: Offset) -> String {
    format!("{LOC_PREFIX}{offset:x}")
}

/// An active loop the region walk is nested inside, innermost last.
#[derive(Clone, Copy)]
struct LoopCtx {
    /// Target of a `continue` inside this loop: the header for `while`/
    /// `for`, the latch for `do-while`.
    continue_target: Offset,
    /// Target of a `break` inside this loop.
    exit: Offset,
}

#[derive(Clone)]
struct LoopShape {
    header: Offset,
    body: HashSet<Offset>,
    latches: Vec<Offset>,
    exit: Offset,
    /// `true` when the header itself is the conditional test (`while`);
    /// `false` when the test lives at the latch (`do-while`).
    is_while: bool,
}

struct Cfg {
    blocks: HashMap<Offset, BasicBlock>,
    graph: DiGraph<Offset, ()>,
    node_of: HashMap<Offset, NodeIndex>,
}

impl Cfg {
    fn successors(&self, offset: Offset) -> Vec<Offset> {
        match self.node_of.get(&offset) {
            Some(&idx) => self.graph.neighbors(idx).map(|n| self.graph[n]).collect(),
            None => Vec::new(),
        }
    }

    fn predecessors(&self, offset: Offset) -> Vec<Offset> {
        match self.node_of.get(&offset) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }
}

fn build_cfg(blocks: Vec<BasicBlock>) -> Cfg {
    let mut graph = DiGraph::new();
    let mut node_of = HashMap::new();
    for block in &blocks {
        node_of.insert(block.start, graph.add_node(block.start));
    }
    for block in &blocks {
        let targets: Vec<Offset> = match &block.terminator {
            Terminator::Fallthrough(t) | Terminator::Jump(t) => vec![*t],
            Terminator::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Terminator::Return(_) => vec![],
        };
        for target in targets {
            if let (Some(&from), Some(&to)) = (node_of.get(&block.start), node_of.get(&target)) {
                graph.add_edge(from, to, ());
            }
        }
    }
    let blocks = blocks.into_iter().map(|b| (b.start, b)).collect();
    Cfg {
        blocks,
        graph,
        node_of,
    }
}

/// Post-dominators, computed over a graph with every `Return` block wired
/// into a synthetic exit node, then reversed. The immediate post-dominator
/// of a branch block is its merge point.
struct PostDom {
    doms: Dominators<NodeIndex>,
    graph: DiGraph<Offset, ()>,
    node_of: HashMap<Offset, NodeIndex>,
}

impl PostDom {
    fn immediate(&self, offset: Offset) -> Option<Offset> {
        let node = *self.node_of.get(&offset)?;
        let idom = self.doms.immediate_dominator(node)?;
        let target = self.graph[idom];
        (target != Offset::MAX).then_some(target)
    }
}

fn post_dominators(cfg: &Cfg) -> PostDom {
    let mut reverse = DiGraph::new();
    let mut node_of = HashMap::new();
    for &offset in cfg.blocks.keys() {
        node_of.insert(offset, reverse.add_node(offset));
    }
    let exit = reverse.add_node(Offset::MAX);
    for block in cfg.blocks.values() {
        let targets: Vec<Offset> = match &block.terminator {
            Terminator::Fallthrough(t) | Terminator::Jump(t) => vec![*t],
            Terminator::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Terminator::Return(_) => vec![],
        };
        let from = node_of[&block.start];
        if targets.is_empty() {
            // Reversal of the conceptual sink edge `from -> exit`.
            reverse.add_edge(exit, from, ());
        }
        for target in targets {
            if let Some(&to) = node_of.get(&target) {
                // Reversed: edge runs target -> from.
                reverse.add_edge(to, from, ());
            }
        }
    }
    let doms = dominators::simple_fast(&reverse, exit);
    PostDom {
        doms,
        graph: reverse,
        node_of,
    }
}

/// Natural loops: a back-edge `latch -> header`
/// where `header` dominates `latch`, widened to every other latch sharing
/// the same header.
fn find_loops(cfg: &Cfg, entry: Offset) -> HashMap<Offset, LoopShape> {
    let entry_node = match cfg.node_of.get(&entry) {
        Some(&n) => n,
        None => return HashMap::new(),
    };
    let doms = dominators::simple_fast(&cfg.graph, entry_node);

    let mut dominates_cache: HashMap<(Offset, Offset), bool> = HashMap::new();
    let mut dominates = |a: Offset, b: Offset| -> bool {
        if let Some(&cached) = dominates_cache.get(&(a, b)) {
            return cached;
        }
        let result = (|| {
            let a_node = *cfg.node_of.get(&a)?;
            let mut current = *cfg.node_of.get(&b)?;
            loop {
                if current == a_node {
                    return Some(true);
                }
                match doms.immediate_dominator(current) {
                    Some(next) if next != current => current = next,
                    _ => return Some(current == a_node),
                }
            }
        })()
        .unwrap_or(false);
        dominates_cache.insert((a, b), result);
        result
    };

    let mut by_header: HashMap<Offset, (HashSet<Offset>, Vec<Offset>)> = HashMap::new();
    for &latch in cfg.blocks.keys() {
        for header in cfg.successors(latch) {
            if dominates(header, latch) {
                let body = natural_loop_body(cfg, latch, header);
                let entry = by_header
                    .entry(header)
                    .or_insert_with(|| (HashSet::new(), Vec::new()));
                entry.0.extend(body);
                entry.1.push(latch);
            }
        }
    }

    let mut loops = HashMap::new();
    for (header, (body, latches)) in by_header {
        let exits: Vec<Offset> = body
            .iter()
            .flat_map(|&n| cfg.successors(n))
            .filter(|n| !body.contains(n))
            .collect();
        let exit = exits.into_iter().min().unwrap_or(header);

        let is_while = matches!(
            cfg.blocks.get(&header).map(|b| &b.terminator),
            Some(Terminator::Branch { if_true, if_false, .. })
                if body.contains(if_true) != body.contains(if_false)
        );

        loops.insert(
            header,
            LoopShape {
                header,
                body,
                latches,
                exit,
                is_while,
            },
        );
    }
    loops
}

fn natural_loop_body(cfg: &Cfg, latch: Offset, header: Offset) -> HashSet<Offset> {
    let mut body = HashSet::new();
    body.insert(header);
    body.insert(latch);
    let mut stack = vec![latch];
    while let Some(n) = stack.pop() {
        for pred in cfg.predecessors(n) {
            if body.insert(pred) {
                stack.push(pred);
            }
        }
    }
    body
}

struct Structurer<'a> {
    cfg: &'a Cfg,
    loops: &'a HashMap<Offset, LoopShape>,
    postdom: PostDom,
    visited: HashSet<Offset>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Structurer<'a> {
    fn merge_of(&self, offset: Offset) -> Option<Offset> {
        self.postdom.immediate(offset)
    }

    fn region(&mut self, start: Offset, stop: Offset, loops: &[LoopCtx]) -> Vec<Stmt> {
        let mut out = Vec::new();
        let mut current = Some(start);
        while let Some(cur) = current {
            if cur == stop {
                break;
            }
            if let Some(shape) = self.loops.get(&cur) {
                if !self.visited.contains(&cur) {
                    let (stmt, after) = self.structure_loop(shape.clone(), loops);
                    out.push(stmt);
                    current = Some(after);
                    continue;
                }
            }
            if !self.visited.insert(cur) {
                out.push(Stmt::Goto(label_name(cur)));
                self.diagnostics.push(Diagnostic::UnstructuredJump {
                    at: cur,
                    target: cur,
                });
                break;
            }
            let block = match self.cfg.blocks.get(&cur) {
                Some(b) => b.clone(),
                None => break,
            };
            out.extend(block.stmts);
            match block.terminator {
                Terminator::Return(expr) => {
                    out.push(Stmt::Return(expr));
                    current = None;
                }
                Terminator::Fallthrough(next) | Terminator::Jump(next) => {
                    current = self.follow(next, stop, loops, &mut out);
                }
                Terminator::Branch {
                    cond,
                    if_true,
                    if_false,
                } => {
                    current = self.branch(cur, cond, if_true, if_false, stop, loops, &mut out);
                }
            }
        }
        out
    }

    /// Resolve a plain (non-branch) jump target against `stop` and the
    /// active loop stack, emitting `break`/`continue` where applicable.
    fn follow(
        &mut self,
        target: Offset,
        stop: Offset,
        loops: &[LoopCtx],
        out: &mut Vec<Stmt>,
    ) -> Option<Offset> {
        if target == stop {
            return None;
        }
        if let Some(innermost) = loops.last() {
            if target == innermost.continue_target {
                out.push(Stmt::Continue);
                return None;
            }
            if target == innermost.exit {
                out.push(Stmt::Break);
                return None;
            }
        }
        Some(target)
    }

    fn branch(
        &mut self,
        at: Offset,
        cond: Expr,
        if_true: Offset,
        if_false: Offset,
        stop: Offset,
        loops: &[LoopCtx],
        out: &mut Vec<Stmt>,
    ) -> Option<Offset> {
        // Break/continue expressed directly as a conditional jump (no
        // reconvergent body on the taken side).
        if let Some(innermost) = loops.last() {
            if if_true == innermost.exit {
                out.push(Stmt::If {
                    cond,
                    then_block: vec![Stmt::Break],
                    else_block: None,
                });
                return self.follow(if_false, stop, loops, out);
            }
            if if_false == innermost.exit {
                // `if_false` leaving straight to the loop's exit is still a
                // break, just guarded by the negated condition so the walk
                // can keep structuring `if_true` as the statements that
                // follow, the same flat (no-`else`) shape as the case above.
                out.push(Stmt::If {
                    cond: negate(cond),
                    then_block: vec![Stmt::Break],
                    else_block: None,
                });
                return self.follow(if_true, stop, loops, out);
            }
        }

        if let Some(switch) = self.try_switch(at, &cond, if_true, if_false, stop, loops) {
            out.push(switch.stmt);
            return if switch.merge == stop {
                None
            } else {
                Some(switch.merge)
            };
        }

        let merge = self.merge_of(at).unwrap_or(stop);
        let then_block = if if_true == merge {
            Vec::new()
        } else {
            self.region(if_true, merge, loops)
        };
        let else_block = if if_false == merge {
            None
        } else {
            Some(self.region(if_false, merge, loops))
        };
        out.push(Stmt::If {
            cond,
            then_block,
            else_block,
        });
        if merge == stop {
            None
        } else {
            Some(merge)
        }
    }

    /// Detect a chain of `discriminant == literal` comparisons sharing a
    /// discriminant, collapsing them into a `switch`.
    fn try_switch(
        &mut self,
        at: Offset,
        cond: &Expr,
        if_true: Offset,
        if_false: Offset,
        stop: Offset,
        loops: &[LoopCtx],
    ) -> Option<SwitchResult> {
        let (discriminant, first_value) = match cond {
            Expr::Binary {
                op: crate::ast::BinOp::Eq,
                lhs,
                rhs,
                ..
            } => match rhs.as_ref() {
                Expr::Literal(crate::ast::Literal::Int(v)) => (lhs.as_ref().clone(), *v),
                _ => return None,
            },
            _ => return None,
        };

        // When every arm terminates the subroutine (e.g. a `switch` whose
        // cases each `return`), no block post-dominates the chain; fall back
        // to `stop`, which the per-case `region()` walk below never actually
        // reaches because each case's own `Return` terminator ends it first.
        let merge = self.merge_of(at).unwrap_or(stop);
        let mut arms: Vec<(i32, Offset)> = vec![(first_value, if_true)];
        let mut cursor = if_false;
        loop {
            let block = self.cfg.blocks.get(&cursor)?;
            match &block.terminator {
                Terminator::Branch {
                    cond: next_cond,
                    if_true: next_true,
                    if_false: next_false,
                } if block.stmts.is_empty() => match next_cond {
                    Expr::Binary {
                        op: crate::ast::BinOp::Eq,
                        lhs,
                        rhs,
                        ..
                    } if lhs.as_ref() == &discriminant => match rhs.as_ref() {
                        Expr::Literal(crate::ast::Literal::Int(v)) => {
                            arms.push((*v, *next_true));
                            cursor = *next_false;
                        }
                        _ => break,
                    },
                    _ => break,
                },
                _ => break,
            }
        }

        if arms.len() < 2 {
            return None;
        }

        let default_target = if cursor == merge { None } else { Some(cursor) };

        let mut cases = Vec::new();
        let mut body_by_target: HashMap<Offset, Vec<Stmt>> = HashMap::new();
        for &(_, target) in &arms {
            body_by_target.entry(target).or_insert_with(|| {
                // Each case's region converges on `merge` via a plain jump,
                // not real switch fallthrough, so it needs an explicit
                // `break` unless it already ends some other way (`return`,
                // a nested `break`/`continue`/`goto`).
                let mut body = self.region(target, merge, loops);
                if !ends_control_flow(&body) {
                    body.push(Stmt::Break);
                }
                body
            });
        }
        let mut emitted_targets: HashSet<Offset> = HashSet::new();
        for (index, &(value, target)) in arms.iter().enumerate() {
            let is_last_of_group = arms
                .get(index + 1)
                .map(|&(_, next_target)| next_target != target)
                .unwrap_or(true);
            if is_last_of_group && emitted_targets.insert(target) {
                cases.push(Case {
                    label: CaseLabel::Value(value),
                    body: body_by_target.remove(&target).unwrap_or_default(),
                    fall_through: false,
                });
            } else {
                cases.push(Case {
                    label: CaseLabel::Value(value),
                    body: Vec::new(),
                    fall_through: true,
                });
            }
        }
        if let Some(default_target) = default_target {
            let mut body = self.region(default_target, merge, loops);
            if !ends_control_flow(&body) {
                body.push(Stmt::Break);
            }
            cases.push(Case {
                label: CaseLabel::Default,
                body,
                fall_through: false,
            });
        }

        Some(SwitchResult {
            stmt: Stmt::Switch {
                discriminant,
                cases,
            },
            merge,
        })
    }

    fn structure_loop(&mut self, shape: LoopShape, loops: &[LoopCtx]) -> (Stmt, Offset) {
        self.visited.insert(shape.header);

        if shape.is_while {
            let (cond, body_start) = match &self.cfg.blocks[&shape.header].terminator {
                Terminator::Branch {
                    cond,
                    if_true,
                    if_false,
                } => {
                    if shape.body.contains(if_true) {
                        (cond.clone(), *if_true)
                    } else {
                        (negate(cond.clone()), *if_false)
                    }
                }
                _ => (Expr::Literal(crate::ast::Literal::Int(1)), shape.header),
            };
            let mut inner_loops = loops.to_vec();
            inner_loops.push(LoopCtx {
                continue_target: shape.header,
                exit: shape.exit,
            });
            let header_stmts = self.cfg.blocks[&shape.header].stmts.clone();
            let mut body = header_stmts;
            body.extend(self.region(body_start, shape.header, &inner_loops));
            (Stmt::While { cond, body }, shape.exit)
        } else {
            // do-while: header runs unconditionally; the test lives at the
            // latch.
            let latch = *shape.latches.first().unwrap_or(&shape.header);
            let mut inner_loops = loops.to_vec();
            inner_loops.push(LoopCtx {
                continue_target: latch,
                exit: shape.exit,
            });
            let mut body = self.region(shape.header, latch, &inner_loops);
            let cond = match self.cfg.blocks.get(&latch).map(|b| &b.terminator) {
                Some(Terminator::Branch {
                    cond, if_true, ..
                }) if shape.body.contains(if_true) => cond.clone(),
                Some(Terminator::Branch { cond, .. }) => negate(cond.clone()),
                _ => Expr::Literal(crate::ast::Literal::Int(1)),
            };
            if let Some(latch_block) = self.cfg.blocks.get(&latch) {
                body.extend(latch_block.stmts.clone());
            }
            self.visited.insert(latch);
            (Stmt::DoWhile { body, cond }, shape.exit)
        }
    }
}

struct SwitchResult {
    stmt: Stmt,
    merge: Offset,
}

fn ends_control_flow(stmts: &[Stmt]) -> bool {
    matches!(
        stmts.last(),
        Some(Stmt::Return(_)) | Some(Stmt::Break) | Some(Stmt::Continue) | Some(Stmt::Goto(_))
    )
}

fn negate(cond: Expr) -> Expr {
    use crate::ast::{BinOp, UnOp};
    match cond {
        Expr::Binary { op, lhs, rhs, ty } => {
            let negated = match op {
                BinOp::Eq => Some(BinOp::Neq),
                BinOp::Neq => Some(BinOp::Eq),
                BinOp::Lt => Some(BinOp::Geq),
                BinOp::Geq => Some(BinOp::Lt),
                BinOp::Gt => Some(BinOp::Leq),
                BinOp::Leq => Some(BinOp::Gt),
                _ => None,
            };
            match negated {
                Some(op) => Expr::Binary { op, lhs, rhs, ty },
                None => Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(Expr::Binary { op, lhs, rhs, ty }),
                    ty: Type::Int,
                },
            }
        }
        other => Expr::Unary {
            op: UnOp::Not,
            ty: other.ty(),
            operand: Box::new(other),
        },
    }
}

use crate::types::Type;

/// Rewrite a `while` whose body ends in a canonical increment of the same
/// variable a canonical init assigns just before loop entry, into a `for`.
fn forify(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out: Vec<Stmt> = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let stmt = recurse_forify(stmt);
        if let Stmt::While { cond, mut body } = stmt {
            let step = body.last().and_then(assigned_name).map(|n| n.to_owned());
            if let Some(var) = step {
                let init_matches = out
                    .last()
                    .and_then(assigned_name)
                    .map(|n| n == var)
                    .unwrap_or(false);
                if init_matches {
                    let step_stmt = body.pop().unwrap();
                    let init_stmt = out.pop().unwrap();
                    out.push(Stmt::For {
                        init: Some(Box::new(init_stmt)),
                        cond: Some(cond),
                        step: Some(Box::new(step_stmt)),
                        body,
                    });
                    continue;
                }
            }
            out.push(Stmt::While { cond, body });
        } else {
            out.push(stmt);
        }
    }
    out
}

fn assigned_name(stmt: &Stmt) -> Option<&str> {
    match stmt {
        Stmt::VarDecl { name, .. } => Some(name),
        Stmt::Expr(Expr::Assign { target, .. }) => match target.as_ref() {
            Expr::Ident { name, .. } => Some(name),
            _ => None,
        },
        _ => None,
    }
}

fn recurse_forify(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Block(body) => Stmt::Block(forify(body)),
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => Stmt::If {
            cond,
            then_block: forify(then_block),
            else_block: else_block.map(forify),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond,
            body: forify(body),
        },
        Stmt::DoWhile { body, cond } => Stmt::DoWhile {
            body: forify(body),
            cond,
        },
        Stmt::For {
            init,
            cond,
            step,
            body,
        } => Stmt::For {
            init,
            cond,
            step,
            body: forify(body),
        },
        Stmt::Switch {
            discriminant,
            cases,
        } => Stmt::Switch {
            discriminant,
            cases: cases
                .into_iter()
                .map(|c| Case {
                    label: c.label,
                    body: forify(c.body),
                    fall_through: c.fall_through,
                })
                .collect(),
        },
        other => other,
    }
}

/// Lift `blocks` (one subroutine's basic blocks) into a structured
/// function body.
pub fn structure(blocks: Vec<BasicBlock>, entry: Offset) -> (Vec<Stmt>, Vec<Diagnostic>) {
    let loops = find_loops(&build_cfg(blocks.clone()), entry);
    let cfg = build_cfg(blocks);
    let postdom = post_dominators(&cfg);
    let all_offsets: HashSet<Offset> = cfg.blocks.keys().copied().collect();

    let mut structurer = Structurer {
        cfg: &cfg,
        loops: &loops,
        postdom,
        visited: HashSet::new(),
        diagnostics: Vec::new(),
    };
    let mut body = structurer.region(entry, Offset::MAX, &[]);

    // Safety net: any block the region walk never reached is appended,
    // labeled, so no decoded instruction is silently dropped.
    let mut stragglers: Vec<Offset> = all_offsets
        .difference(&structurer.visited)
        .copied()
        .collect();
    stragglers.sort_unstable();
    for offset in stragglers {
        let block = cfg.blocks[&offset].clone();
        body.push(Stmt::Label(label_name(offset)));
        body.extend(block.stmts);
        match block.terminator {
            Terminator::Return(expr) => body.push(Stmt::Return(expr)),
            Terminator::Jump(target) | Terminator::Fallthrough(target) => {
                body.push(Stmt::Goto(label_name(target)));
                structurer.diagnostics.push(Diagnostic::UnstructuredJump {
                    at: offset,
                    target,
                });
            }
            Terminator::Branch {
                if_true, if_false, ..
            } => {
                body.push(Stmt::Goto(label_name(if_true)));
                structurer.diagnostics.push(Diagnostic::UnstructuredJump {
                    at: offset,
                    target: if_true,
                });
                let _ = if_false;
            }
        }
    }

    (forify(body), structurer.diagnostics)
}
