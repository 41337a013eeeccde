use crate::common::{debug_main, TestEnv, MAIN_ID};
use pldbg::catalog::RoutineId;
use pldbg::protocol::{VarClass, Variable};
use pldbg::proxy::{ProxyAgent, SessionHandle, StepOutcome};
use pldbg::script::{Value, INT8_TYPE, TEXT_TYPE, UNKNOWN_TYPE};
use serial_test::serial;

fn variables(proxy: &mut ProxyAgent, h: SessionHandle) -> Vec<Variable> {
    proxy
        .get_variables(h)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn value_of(vars: &[Variable], name: &str) -> String {
    vars.iter()
        .find(|v| v.name == name)
        .map(|v| v.value.clone())
        .unwrap()
}

#[test]
#[serial]
fn test_read_variables() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();

    let vars = variables(&mut proxy, h);
    assert_eq!(
        vars,
        vec![
            Variable {
                name: "x".to_string(),
                class: VarClass::Argument,
                line: 0,
                unique: true,
                is_const: false,
                not_null: false,
                type_id: INT8_TYPE,
                value: "5".to_string(),
            },
            Variable {
                name: "y".to_string(),
                class: VarClass::Local,
                line: 1,
                unique: true,
                is_const: false,
                not_null: false,
                type_id: UNKNOWN_TYPE,
                value: "NULL".to_string(),
            },
            Variable {
                name: "z".to_string(),
                class: VarClass::Local,
                line: 2,
                unique: true,
                is_const: false,
                not_null: false,
                type_id: UNKNOWN_TYPE,
                value: "NULL".to_string(),
            },
        ]
    );

    proxy.step_over(h).unwrap();
    assert_eq!(value_of(&variables(&mut proxy, h), "y"), "10");

    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Int(11));
}

#[test]
#[serial]
fn test_deposit_value() {
    let env = TestEnv::new();
    let run = debug_main(&env, 5);
    let mut proxy = env.proxy();
    let h = proxy.attach_to_port(run.announced_port()).unwrap();
    proxy.wait_for_breakpoint(h).unwrap();
    assert!(proxy.set_breakpoint(h, RoutineId(MAIN_ID), 3).unwrap());
    proxy.continue_(h).unwrap();

    // value is evaluated as an expression
    assert!(proxy.deposit_value(h, "z", None, "5+5").unwrap());
    assert_eq!(value_of(&variables(&mut proxy, h), "z"), "10");

    // not an expression, taken as a text literal
    assert!(proxy.deposit_value(h, "z", Some(2), "it's done").unwrap());
    let vars = variables(&mut proxy, h);
    let z = vars.iter().find(|v| v.name == "z").unwrap();
    assert_eq!(z.value, "it's done");
    assert_eq!(z.type_id, TEXT_TYPE);

    // wrong declaration line or unknown name
    assert!(!proxy.deposit_value(h, "z", Some(1), "1").unwrap());
    assert!(!proxy.deposit_value(h, "nope", None, "1").unwrap());
    // hidden interpreter variables cannot be changed
    assert!(!proxy.deposit_value(h, "found", None, "1").unwrap());
    // a name that can't be sent is refused before reaching the target
    assert!(matches!(
        proxy.deposit_value(h, "", None, "1"),
        Err(pldbg::Error::InvalidVariableName(_))
    ));

    assert_eq!(proxy.continue_(h).unwrap(), StepOutcome::Finished);
    assert_eq!(run.join().unwrap(), Value::Text("it's done".to_string()));
}
