//! Pattern construction: parsed script → pattern tree with compiled
//! delegates.

use std::sync::Arc;

use thiserror::Error;

use brg_compile::{CompileError, Compiler, Gcxf};
use brg_ir::{CallKind, CallNode, Span};
use brg_parse::{parse_script, BlockKind, ParseError, PhaseDecl, PropDecl};

use crate::node::{Action, PatternNode, PhaseKind, PhaseProps};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("unknown action `{name}`")]
    UnknownAction { name: String, span: Span },

    #[error("unknown phase property `{name}`")]
    UnknownProp { name: String, span: Span },

    #[error("property `{name}` expects {expected}")]
    BadProp {
        name: String,
        expected: &'static str,
        span: Span,
    },

    #[error("`{name}` requires argument `{arg}`")]
    MissingArg {
        name: String,
        arg: &'static str,
        span: Span,
    },

    #[error("`wait` is only allowed inside async blocks")]
    WaitInSyncBlock { span: Span },
}

/// Compile a script into an executable pattern tree. `Arc` so many runtime
/// instances can share one tree.
pub fn build_pattern(src: &str, compiler: &Compiler) -> Result<Arc<PatternNode>, BuildError> {
    let ast = parse_script(src)?;
    let mut phases = Vec::with_capacity(ast.phases.len());
    for decl in &ast.phases {
        phases.push(build_phase(decl, compiler)?);
    }
    Ok(Arc::new(PatternNode::Pattern { phases }))
}

fn build_phase(decl: &PhaseDecl, compiler: &Compiler) -> Result<PatternNode, BuildError> {
    let timeout: Gcxf<f32> = compiler.compile_node(&decl.timeout)?;
    let mut props = PhaseProps {
        kind: None,
        hp: None,
        background: None,
    };
    for prop in &decl.props {
        apply_prop(&mut props, prop)?;
    }
    let mut children = Vec::with_capacity(decl.blocks.len());
    for block in &decl.blocks {
        let wait: Gcxf<f32> = compiler.compile_node(&block.wait)?;
        let mut actions = Vec::with_capacity(block.actions.len());
        for action in &block.actions {
            let built = build_action(action, compiler)?;
            if matches!(built, Action::Wait { .. }) && block.kind == BlockKind::Sync {
                return Err(BuildError::WaitInSyncBlock { span: action.span });
            }
            actions.push(PatternNode::Action(built));
        }
        children.push(match block.kind {
            BlockKind::Sync => PatternNode::Sync {
                wait,
                children: actions,
            },
            BlockKind::Async => PatternNode::Async {
                wait,
                children: actions,
            },
        });
    }
    Ok(PatternNode::Phase {
        props,
        timeout,
        children,
    })
}

fn apply_prop(props: &mut PhaseProps, prop: &PropDecl) -> Result<(), BuildError> {
    match prop.name.as_str() {
        "hp" => {
            let hp = prop.args.first().and_then(CallNode::as_num);
            let Some(hp) = hp else {
                return Err(BuildError::BadProp {
                    name: prop.name.clone(),
                    expected: "a numeric hit-point budget",
                    span: prop.span,
                });
            };
            props.hp = Some(hp.max(0.0) as u32);
        }
        "type" => {
            let kind = prop
                .args
                .first()
                .and_then(|a| a.name())
                .and_then(PhaseKind::parse);
            let Some(kind) = kind else {
                return Err(BuildError::BadProp {
                    name: prop.name.clone(),
                    expected: "one of stage/nonspell/spell/timeout/dialogue",
                    span: prop.span,
                });
            };
            props.kind = Some(kind);
        }
        "bg" => {
            let Some(key) = prop.args.first().and_then(|a| a.name()) else {
                return Err(BuildError::BadProp {
                    name: prop.name.clone(),
                    expected: "a background key",
                    span: prop.span,
                });
            };
            props.background = Some(key.to_owned());
        }
        _ => {
            return Err(BuildError::UnknownProp {
                name: prop.name.clone(),
                span: prop.span,
            })
        }
    }
    Ok(())
}

/// Argument lookup over an action call: named args by key, positional args
/// by declared order.
struct Args<'a> {
    args: &'a [CallNode],
    names: &'static [&'static str],
}

impl<'a> Args<'a> {
    fn get(&self, name: &str) -> Option<&'a CallNode> {
        if let Some(found) = self
            .args
            .iter()
            .find(|a| a.key.as_deref() == Some(name))
        {
            return Some(found);
        }
        // Positional arguments fill declared order, skipping keyed ones.
        let pos = self.names.iter().position(|n| *n == name)?;
        let skip = pos_offset(self.args, self.names, pos);
        self.args.iter().filter(|a| a.key.is_none()).nth(skip)
    }
}

/// Position of `pos` among parameters not already bound by key.
fn pos_offset(args: &[CallNode], names: &[&str], pos: usize) -> usize {
    let bound_before = names[..pos]
        .iter()
        .filter(|n| args.iter().any(|a| a.key.as_deref() == Some(**n)))
        .count();
    pos - bound_before
}

fn build_action(node: &CallNode, compiler: &Compiler) -> Result<Action, BuildError> {
    let CallKind::Call { name, args } = &node.kind else {
        return Err(BuildError::UnknownAction {
            name: "<literal>".to_owned(),
            span: node.span,
        });
    };
    match name.as_str() {
        "fire-straight" => {
            let args = Args {
                args,
                names: &["speed", "angle", "style"],
            };
            let speed = num_arg(&args, "speed", compiler, 1.0)?;
            let angle = num_arg(&args, "angle", compiler, 0.0)?;
            let style = ident_arg(&args, "style").unwrap_or_else(|| "orb".to_owned());
            Ok(Action::FireStraight { style, speed, angle })
        }
        "fire-curve" => {
            let args = Args {
                args,
                names: &["pos", "style"],
            };
            let Some(pos) = args.get("pos") else {
                return Err(BuildError::MissingArg {
                    name: name.clone(),
                    arg: "pos",
                    span: node.span,
                });
            };
            let curve = compiler.velocity_node(pos)?;
            let style = ident_arg(&args, "style").unwrap_or_else(|| "orb".to_owned());
            Ok(Action::FireCurve { style, curve })
        }
        "effect" => {
            let args = Args {
                args,
                names: &["key"],
            };
            let Some(key) = ident_arg(&args, "key") else {
                return Err(BuildError::MissingArg {
                    name: name.clone(),
                    arg: "key",
                    span: node.span,
                });
            };
            Ok(Action::Effect { key })
        }
        "wait" => {
            let args = Args {
                args,
                names: &["seconds"],
            };
            let seconds = num_arg(&args, "seconds", compiler, 0.0)?;
            Ok(Action::Wait { seconds })
        }
        _ => Err(BuildError::UnknownAction {
            name: name.clone(),
            span: node.span,
        }),
    }
}

fn num_arg(
    args: &Args<'_>,
    name: &str,
    compiler: &Compiler,
    default: f32,
) -> Result<Gcxf<f32>, BuildError> {
    match args.get(name) {
        Some(node) => Ok(compiler.compile_node(node)?),
        None => Ok(compiler.compile_node(&CallNode::num(default, Span::DUMMY))?),
    }
}

fn ident_arg(args: &Args<'_>, name: &str) -> Option<String> {
    args.get(name).and_then(|a| a.name()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use brg_ops::build_op_table;

    fn compiler() -> Compiler {
        Compiler::new(Rc::new(build_op_table()))
    }

    #[test]
    fn test_example_scenario_builds_expected_tree() {
        let c = compiler();
        let pattern =
            build_pattern("phase 0 <hp 1000> action block 0 fire-straight(speed=2)", &c).unwrap();
        let phases = pattern.phases();
        assert_eq!(phases.len(), 1);
        let PatternNode::Phase { props, children, .. } = &phases[0] else {
            panic!("expected a phase");
        };
        assert_eq!(props.hp, Some(1000));
        assert_eq!(children.len(), 1);
        let PatternNode::Sync { children, .. } = &children[0] else {
            panic!("expected a sync block");
        };
        assert_eq!(children.len(), 1);
        assert!(matches!(
            children[0],
            PatternNode::Action(Action::FireStraight { .. })
        ));
    }

    #[test]
    fn test_phase_type_prop() {
        let c = compiler();
        let pattern = build_pattern("phase 30 <type spell> <hp 500> effect(chime)", &c).unwrap();
        let PatternNode::Phase { props, .. } = &pattern.phases()[0] else {
            panic!("expected a phase");
        };
        assert_eq!(props.kind, Some(PhaseKind::Spell));
        assert_eq!(props.hp, Some(500));
    }

    #[test]
    fn test_unknown_action_is_an_error() {
        let c = compiler();
        let err = build_pattern("phase 0 detonate-everything(1)", &c).unwrap_err();
        assert!(matches!(err, BuildError::UnknownAction { ref name, .. } if name == "detonate-everything"));
    }

    #[test]
    fn test_wait_rejected_in_sync_block() {
        let c = compiler();
        let err = build_pattern("phase 0 action block 0 wait(1)", &c).unwrap_err();
        assert!(matches!(err, BuildError::WaitInSyncBlock { .. }));
    }

    #[test]
    fn test_wait_allowed_in_async_block() {
        let c = compiler();
        assert!(build_pattern("phase 0 action async 0 wait(1) fire-straight(speed=1)", &c).is_ok());
    }

    #[test]
    fn test_unknown_prop_is_an_error() {
        let c = compiler();
        let err = build_pattern("phase 0 <sparkle 3> effect(chime)", &c).unwrap_err();
        assert!(matches!(err, BuildError::UnknownProp { ref name, .. } if name == "sparkle"));
    }

    #[test]
    fn test_fire_curve_compiles_derivative() {
        let c = compiler();
        let ok = build_pattern(
            "phase 0 action block 0 fire-curve(pos = pxy(mul(2, t), mul(t, t)))",
            &c,
        );
        assert!(ok.is_ok());
        // A non-differentiable curve fails at build time.
        let err = build_pattern(
            "phase 0 action block 0 fire-curve(pos = pxy(atan2(t, 1), 0))",
            &c,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Compile(CompileError::NonDifferentiable { .. })
        ));
    }
}
