//! Parser integration tests: layout, precedence, and error cases.

use forma_script::ast::{BinOp, ExprKind, StmtKind};
use forma_script::parse;

#[test]
fn test_empty_module() {
    let module = parse("").unwrap();
    assert!(module.stmts.is_empty());
}

#[test]
fn test_precedence() {
    let module = parse("x = 1 + 2 * 3").unwrap();
    let StmtKind::Assign { value, .. } = &module.stmts[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::Binary { op, right, .. } = &value.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_comparison_chaining_rejected() {
    let err = parse("x = 1 < 2 < 3").unwrap_err();
    assert!(err.message.contains("chained"));
}

#[test]
fn test_def_with_block() {
    let source = "\
def main():
    x = 1
    return x
";
    let module = parse(source).unwrap();
    let StmtKind::Def(def) = &module.stmts[0].kind else {
        panic!("expected def");
    };
    assert_eq!(def.name, "main");
    assert_eq!(def.body.len(), 2);
}

#[test]
fn test_nested_blocks() {
    let source = "\
def main():
    if x:
        y = 1
        z = 2
    else:
        y = 3
    return y
";
    let module = parse(source).unwrap();
    let StmtKind::Def(def) = &module.stmts[0].kind else {
        panic!("expected def");
    };
    assert_eq!(def.body.len(), 2);
    let StmtKind::If { branches, orelse } = &def.body[0].kind else {
        panic!("expected if");
    };
    assert_eq!(branches[0].1.len(), 2);
    assert_eq!(orelse.len(), 1);
}

#[test]
fn test_elif_chain() {
    let source = "\
if a:
    pass
elif b:
    pass
else:
    pass
";
    let module = parse(source).unwrap();
    let StmtKind::If { branches, orelse } = &module.stmts[0].kind else {
        panic!("expected if");
    };
    assert_eq!(branches.len(), 2);
    assert_eq!(orelse.len(), 1);
}

#[test]
fn test_same_line_suite() {
    let module = parse("if x: return 1").unwrap();
    assert!(matches!(module.stmts[0].kind, StmtKind::If { .. }));
}

#[test]
fn test_implicit_line_joining() {
    let source = "\
x = [
    1,
    2,
]
y = f(
    a,
    b=2,
)
";
    let module = parse(source).unwrap();
    assert_eq!(module.stmts.len(), 2);
}

#[test]
fn test_statement_break_at_newline() {
    // Without brackets, a newline terminates the statement: this is two
    // statements, not `x = 1 - y`.
    let source = "x = 1\n-y\n";
    let module = parse(source).unwrap();
    assert_eq!(module.stmts.len(), 2);
    assert!(matches!(module.stmts[1].kind, StmtKind::Expr(_)));
}

#[test]
fn test_unexpected_indent() {
    let source = "x = 1\n    y = 2\n";
    let err = parse(source).unwrap_err();
    assert!(err.message.contains("indent"));
}

#[test]
fn test_missing_block() {
    let source = "def f():\npass\n";
    let err = parse(source).unwrap_err();
    assert!(err.message.contains("indented block"));
}

#[test]
fn test_nested_def_rejected() {
    let source = "\
def outer():
    def inner():
        pass
";
    let err = parse(source).unwrap_err();
    assert!(err.message.contains("top level"));
}

#[test]
fn test_load_statement() {
    let module = parse(r#"load("//lib/util.pconf", "helper", alias="other")"#).unwrap();
    let StmtKind::Load { module: m, symbols } = &module.stmts[0].kind else {
        panic!("expected load");
    };
    assert_eq!(m, "//lib/util.pconf");
    assert_eq!(
        symbols,
        &vec![
            ("helper".to_string(), "helper".to_string()),
            ("alias".to_string(), "other".to_string()),
        ]
    );
}

#[test]
fn test_load_requires_symbols() {
    let err = parse(r#"load("m.pconf")"#).unwrap_err();
    assert!(err.message.contains("at least one symbol"));
}

#[test]
fn test_load_inside_function_rejected() {
    let source = "\
def f():
    load(\"m.pconf\", \"x\")
";
    let err = parse(source).unwrap_err();
    assert!(err.message.contains("top level"));
}

#[test]
fn test_for_tuple_target() {
    let source = "\
for k, v in items:
    pass
";
    let module = parse(source).unwrap();
    let StmtKind::For { target, .. } = &module.stmts[0].kind else {
        panic!("expected for");
    };
    assert!(matches!(target, forma_script::ast::Target::Tuple(t) if t.len() == 2));
}

#[test]
fn test_comprehensions() {
    let module = parse("squares = [x * x for x in xs if x > 0]").unwrap();
    let StmtKind::Assign { value, .. } = &module.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::ListComp { .. }));

    let module = parse("m = {k: v for k, v in pairs}").unwrap();
    let StmtKind::Assign { value, .. } = &module.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::DictComp { .. }));
}

#[test]
fn test_conditional_expression() {
    let module = parse("x = a if cond else b").unwrap();
    let StmtKind::Assign { value, .. } = &module.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Conditional { .. }));
}

#[test]
fn test_keyword_after_positional_only() {
    let err = parse("x = f(a=1, 2)").unwrap_err();
    assert!(err.message.contains("positional argument after keyword"));
}

#[test]
fn test_augmented_assignment() {
    let module = parse("x += [1]").unwrap();
    assert!(matches!(
        module.stmts[0].kind,
        StmtKind::AugAssign {
            op: BinOp::Add,
            ..
        }
    ));
}

#[test]
fn test_attribute_and_index_targets() {
    let module = parse("a.b = 1\nc[0] = 2\n").unwrap();
    assert!(matches!(
        &module.stmts[0].kind,
        StmtKind::Assign {
            target: forma_script::ast::Target::Attr(..),
            ..
        }
    ));
    assert!(matches!(
        &module.stmts[1].kind,
        StmtKind::Assign {
            target: forma_script::ast::Target::Index(..),
            ..
        }
    ));
}

#[test]
fn test_not_in_operator() {
    let module = parse("x = a not in b").unwrap();
    let StmtKind::Assign { value, .. } = &module.stmts[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(
        value.kind,
        ExprKind::Binary {
            op: BinOp::NotIn,
            ..
        }
    ));
}
