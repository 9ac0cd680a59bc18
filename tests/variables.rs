use robot_debugger::debugger::{
    is_automatic, ScopedVariables, StackFrameVariable, StackFrameVariables, Variable,
    VariableScope, VariableTypedValue,
};
use indexmap::IndexMap;
use serde_json::{json, Value};

// Helper to build one scope snapshot the way the agent reports it
fn scoped(vars: &[(&str, VariableScope, &str, Value)]) -> ScopedVariables {
    vars.iter()
        .map(|(name, scope, type_name, value)| {
            (
                Variable::new(*name, *scope),
                VariableTypedValue::new(*type_name, value.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod variables_tests {
    use super::*;

    #[test]
    fn test_automatic_variables_are_recognized_per_scope() {
        assert!(is_automatic("${TEST_NAME}", VariableScope::TestCase));
        assert!(is_automatic("${keyword_status}", VariableScope::Local));
        assert!(!is_automatic("${TEST_NAME}", VariableScope::Local));
        assert!(!is_automatic("${my_var}", VariableScope::Global));
    }

    #[test]
    fn test_non_local_variables_keep_wire_order() {
        let vars = StackFrameVariables::new_non_local_variables(&scoped(&[
            ("${b}", VariableScope::TestSuite, "str", json!("x")),
            ("${a}", VariableScope::TestSuite, "int", json!(1)),
            ("${SUITE_NAME}", VariableScope::TestSuite, "str", json!("Suite")),
        ]));

        let names: Vec<&str> = vars.iter().map(StackFrameVariable::name).collect();
        assert_eq!(names, vec!["${b}", "${a}", "${SUITE_NAME}"]);
        assert!(vars.get("${SUITE_NAME}").unwrap().is_automatic());
        assert!(!vars.get("${a}").unwrap().is_automatic());
        assert_eq!(vars.get("${a}").unwrap().value(), &json!(1));
    }

    #[test]
    fn test_locals_are_dropped_unless_preserved() {
        let parent = StackFrameVariables::new_non_local_variables(&scoped(&[
            ("${global}", VariableScope::Global, "str", json!("g")),
            ("${local}", VariableScope::Local, "str", json!("l")),
        ]));

        let keyword = StackFrameVariables::new_local_variables(&parent, false);
        assert_eq!(keyword.len(), 1);
        assert!(keyword.get("${local}").is_none(), "Locals must not leak into a called keyword");

        let loop_vars = StackFrameVariables::new_local_variables(&parent, true);
        assert_eq!(loop_vars.len(), 2, "Loops share locals of their keyword");
    }

    #[test]
    fn test_update_classifies_every_name() {
        let mut vars = StackFrameVariables::new_non_local_variables(&scoped(&[
            ("${same}", VariableScope::Local, "int", json!(1)),
            ("${changed}", VariableScope::Local, "int", json!(1)),
            ("${gone}", VariableScope::Local, "int", json!(1)),
        ]));

        let delta = vars.update(&scoped(&[
            ("${same}", VariableScope::Local, "int", json!(1)),
            ("${changed}", VariableScope::Local, "int", json!(2)),
            ("${new}", VariableScope::Local, "list", json!([1, 2])),
        ]));

        assert!(delta.is_unchanged("${same}"));
        assert!(delta.is_changed("${changed}"));
        assert!(delta.is_added("${new}"));
        assert!(delta.is_removed("${gone}"));
        assert_eq!(delta.removed().collect::<Vec<_>>(), vec!["${gone}"]);

        assert_eq!(vars.len(), 3);
        assert!(vars.get("${gone}").is_none());
        assert_eq!(vars.get("${changed}").unwrap().value(), &json!(2));
        assert_eq!(vars.get("${new}").unwrap().type_name(), "list");
    }

    #[test]
    fn test_scope_change_counts_as_change() {
        let mut vars = StackFrameVariables::new_non_local_variables(&scoped(&[(
            "${x}",
            VariableScope::Local,
            "int",
            json!(1),
        )]));
        let delta = vars.update(&scoped(&[("${x}", VariableScope::TestCase, "int", json!(1))]));

        assert!(delta.is_changed("${x}"));
        assert_eq!(vars.get("${x}").unwrap().scope(), VariableScope::TestCase);
    }

    #[test]
    fn test_type_change_counts_as_change() {
        let mut vars = StackFrameVariables::new_non_local_variables(&scoped(&[(
            "${var4}",
            VariableScope::Local,
            "double",
            json!(1),
        )]));
        let delta = vars.update(&scoped(&[("${var4}", VariableScope::Local, "int", json!(1))]));

        assert!(delta.is_changed("${var4}"));
        assert!(!delta.is_unchanged("${var4}"));
        assert_eq!(vars.get("${var4}").unwrap().type_name(), "int");
    }

    #[test]
    fn test_changed_variable_keeps_automatic_flag() {
        let mut initial = IndexMap::new();
        initial.insert(
            "${custom}".to_string(),
            StackFrameVariable::new(VariableScope::Local, true, "${custom}", "int", json!(1)),
        );
        let mut vars = StackFrameVariables::new(initial);

        let delta = vars.update(&scoped(&[("${custom}", VariableScope::Local, "int", json!(2))]));

        assert!(delta.is_changed("${custom}"));
        let custom = vars.get("${custom}").unwrap();
        assert_eq!(custom.value(), &json!(2));
        assert!(custom.is_automatic(), "Flag set at creation survives value changes");
    }

    #[test]
    fn test_added_variables_keep_reported_order() {
        let mut vars = StackFrameVariables::new_non_local_variables(&scoped(&[(
            "${a}",
            VariableScope::Local,
            "int",
            json!(1),
        )]));

        let delta = vars.update(&scoped(&[
            ("${a}", VariableScope::Local, "int", json!(1)),
            ("${z}", VariableScope::Local, "int", json!(2)),
            ("${b}", VariableScope::Local, "int", json!(3)),
        ]));

        assert_eq!(delta.added().collect::<Vec<_>>(), vec!["${z}", "${b}"]);
        let names: Vec<&str> = vars.iter().map(StackFrameVariable::name).collect();
        assert_eq!(names, vec!["${a}", "${z}", "${b}"]);
    }

    #[test]
    fn test_copied_variables_are_independent_of_parent() {
        let mut parent = StackFrameVariables::new_non_local_variables(&scoped(&[(
            "&{dict}",
            VariableScope::TestSuite,
            "dict",
            json!({"a": [1, 2]}),
        )]));
        let copy = parent.get("&{dict}").unwrap().copy();
        let child = StackFrameVariables::new_local_variables(&parent, false);

        parent.update(&scoped(&[(
            "&{dict}",
            VariableScope::TestSuite,
            "dict",
            json!({"a": [3]}),
        )]));

        assert_eq!(parent.get("&{dict}").unwrap().value(), &json!({"a": [3]}));
        assert_eq!(copy.value(), &json!({"a": [1, 2]}));
        assert_eq!(child.get("&{dict}").unwrap().value(), &json!({"a": [1, 2]}));
    }
}
