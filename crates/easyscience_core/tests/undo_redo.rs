use easyscience_core::{
    BaseCollection, BaseObj, Constraint, CoreError, DescriptorNumber, Descriptor, Parameter, Result,
    Session, SessionSettings,
};
use pretty_assertions::assert_eq;

fn recording_session() -> Session {
    Session::with_settings(SessionSettings {
        undo_enabled: true,
        ..Default::default()
    })
}

fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
    match result {
        Ok(v) => panic!("expected error containing '{needle}', got Ok({v:?})"),
        Err(e) => assert!(
            e.to_string().contains(needle),
            "expected error containing '{needle}', got '{e}'"
        ),
    }
}

/// Applies `edit`, checks `read` moves from its old value to `future`, then
/// undoes and redoes.
fn do_undo_redo<T, E, R>(session: &mut Session, key: &str, future: T, edit: E, read: R)
where
    T: PartialEq + std::fmt::Debug + Clone,
    E: FnOnce(&mut Session, &str) -> Result<()>,
    R: Fn(&Session, &str) -> T,
{
    let previous = read(&*session, key);
    edit(&mut *session, key).unwrap();
    assert_eq!(read(&*session, key), future);
    assert!(session.stack().can_undo());
    session.undo().unwrap();
    assert_eq!(read(&*session, key), previous);
    assert!(session.stack().can_redo());
    session.redo().unwrap();
    assert_eq!(read(&*session, key), future);
}

fn number(session: &mut Session) -> String {
    session
        .add(DescriptorNumber::new("DescriptorNumber", 1.0).with_unit("m/s").unwrap())
        .unwrap()
}

fn parameter(session: &mut Session) -> String {
    session
        .add(Parameter::new("Parameter", 1.0).with_unit("m/s").unwrap())
        .unwrap()
}

#[test]
fn descriptor_number_attributes() {
    let mut s = recording_session();
    let key = number(&mut s);
    do_undo_redo(&mut s, &key, 500.0, |s, k| s.set_value(k, 500.0), |s, k| s.value(k).unwrap());
    do_undo_redo(
        &mut s,
        &key,
        Some(5.0),
        |s, k| s.set_error(k, Some(5.0)),
        |s, k| s.number(k).unwrap().error(),
    );
    do_undo_redo(
        &mut s,
        &key,
        "km/s".to_string(),
        |s, k| s.convert_unit(k, "km/s"),
        |s, k| s.number(k).unwrap().unit().to_string(),
    );
    do_undo_redo(
        &mut s,
        &key,
        "boom".to_string(),
        |s, k| s.set_display_name(k, "boom"),
        |s, k| s.get(k).unwrap().display_name().to_string(),
    );
}

#[test]
fn parameter_attributes() {
    let mut s = recording_session();
    let key = parameter(&mut s);
    do_undo_redo(&mut s, &key, 500.0, |s, k| s.set_value(k, 500.0), |s, k| s.value(k).unwrap());
    do_undo_redo(
        &mut s,
        &key,
        Some(5.0),
        |s, k| s.set_error(k, Some(5.0)),
        |s, k| s.parameter(k).unwrap().error(),
    );
    do_undo_redo(
        &mut s,
        &key,
        "km/s".to_string(),
        |s, k| s.convert_unit(k, "km/s"),
        |s, k| s.parameter(k).unwrap().unit().to_string(),
    );
    do_undo_redo(&mut s, &key, false, |s, k| s.set_enabled(k, false), |s, k| {
        s.parameter(k).unwrap().enabled()
    });
    do_undo_redo(&mut s, &key, true, |s, k| s.set_fixed(k, true), |s, k| {
        s.parameter(k).unwrap().fixed()
    });
    do_undo_redo(&mut s, &key, 505.0, |s, k| s.set_max(k, 505.0), |s, k| {
        s.parameter(k).unwrap().max()
    });
    do_undo_redo(&mut s, &key, -1.0, |s, k| s.set_min(k, -1.0), |s, k| {
        s.parameter(k).unwrap().min()
    });
}

#[test]
fn group_children_values() {
    let mut s = recording_session();
    let children: Vec<String> = (0..5)
        .map(|i| s.add(Parameter::new(format!("p{i}"), i as f64)).unwrap())
        .collect();
    let group = children
        .iter()
        .fold(BaseObj::new("test"), |g, key| g.with_child(key.clone(), key));
    let group = s.add(group).unwrap();

    for key in &children {
        let attribute = s.group(&group).unwrap().child_key(key).unwrap().to_string();
        let future = s.value(&attribute).unwrap() + 1.0;
        do_undo_redo(&mut s, &attribute, future, |s, k| s.set_value(k, future), |s, k| {
            s.value(k).unwrap()
        });
    }
}

#[test]
fn collection_insert_remove_and_replace() {
    let mut s = recording_session();
    let mut expected: Vec<String> = (0..5)
        .map(|i| s.add(Parameter::new(format!("p{i}"), i as f64)).unwrap())
        .collect();
    let coll = s.add(BaseCollection::new("test").with_items(expected.clone())).unwrap();
    let slip_in = s.add(Parameter::new("slip_in", 50.0)).unwrap();
    let items = |s: &Session| s.collection(&coll).unwrap().items().to_vec();
    let idx = 2;

    s.collection_insert(&coll, idx, &slip_in).unwrap();
    expected.insert(idx, slip_in.clone());
    assert_eq!(items(&s), expected);
    s.undo().unwrap();
    expected.remove(idx);
    assert_eq!(items(&s), expected);
    s.redo().unwrap();
    expected.insert(idx, slip_in.clone());
    assert_eq!(items(&s), expected);

    s.collection_remove(&coll, idx).unwrap();
    expected.remove(idx);
    assert_eq!(items(&s), expected);
    s.undo().unwrap();
    assert_eq!(items(&s)[idx], slip_in);
    s.redo().unwrap();
    assert_eq!(items(&s), expected);

    let old_item = expected[idx].clone();
    s.collection_set_item(&coll, idx, &slip_in).unwrap();
    expected[idx] = slip_in.clone();
    assert_eq!(items(&s), expected);
    s.undo().unwrap();
    assert_eq!(items(&s)[idx], old_item);
    s.redo().unwrap();
    assert_eq!(items(&s), expected);
}

#[test]
fn macros_group_value_edits() {
    let mut s = recording_session();
    let keys: Vec<String> = (0..5)
        .map(|i| s.add(Parameter::new(format!("p{i}"), i as f64)).unwrap())
        .collect();
    let values: Vec<f64> = keys.iter().map(|k| s.value(k).unwrap()).collect();

    s.begin_macro("test_macro").unwrap();
    for (key, value) in keys.iter().zip(&values) {
        s.set_value(key, value + 5.0).unwrap();
    }
    s.end_macro().unwrap();
    assert_eq!(s.stack().undo_text(), Some("test_macro"));

    s.undo().unwrap();
    for (key, value) in keys.iter().zip(&values) {
        assert_eq!(s.value(key).unwrap(), *value);
    }
    assert_eq!(s.stack().redo_text(), Some("test_macro"));
    s.redo().unwrap();
    for (key, value) in keys.iter().zip(&values) {
        assert_eq!(s.value(key).unwrap(), value + 5.0);
    }
}

#[test]
fn constrained_dependents_follow_history() {
    let mut s = recording_session();
    let a = s.add(Parameter::new("a", 1.0)).unwrap();
    let b = s.add(Parameter::new("b", 0.0)).unwrap();
    let id = s.constrain(&a, "offset", Constraint::object(&b, "1 +", &a).unwrap()).unwrap();
    s.apply_constraint(id, false).unwrap();
    assert_eq!(s.value(&b).unwrap(), 2.0);

    s.set_value(&a, 4.0).unwrap();
    assert_eq!(s.value(&b).unwrap(), 5.0);
    assert_eq!(s.stack().undo_text(), Some(format!("Setting value of {a}").as_str()));

    s.undo().unwrap();
    assert_eq!(s.value(&a).unwrap(), 1.0);
    assert_eq!(s.value(&b).unwrap(), 2.0);

    // `b` only changes through its constraint.
    s.set_value(&b, 10.0).unwrap();
    assert_eq!(s.value(&b).unwrap(), 2.0);
}

#[test]
fn constraints_outlive_the_edits_they_follow() {
    let mut s = recording_session();
    let a = s.add(Parameter::new("a", 1.0)).unwrap();
    let b = s.add(Parameter::new("b", 2.0)).unwrap();
    s.set_value(&a, 5.0).unwrap();
    s.set_value(&b, 7.0).unwrap();
    s.constrain(&a, "twice", Constraint::object(&b, "2*", &a).unwrap()).unwrap();

    // Undoing the write to `b` lands on what the constraint dictates.
    s.undo().unwrap();
    assert_eq!(s.value(&b).unwrap(), 10.0);
    assert!(!s.parameter(&b).unwrap().enabled());

    s.undo().unwrap();
    assert_eq!(s.value(&a).unwrap(), 1.0);
    assert_eq!(s.value(&b).unwrap(), 2.0);
    assert_eq!(s.parameter(&a).unwrap().user_constraints().len(), 1);
    assert!(!s.parameter(&b).unwrap().enabled());

    s.set_value(&a, 3.0).unwrap();
    assert_eq!(s.value(&b).unwrap(), 6.0);
}

#[test]
fn removed_children_come_back_on_undo() {
    let mut s = recording_session();
    let a = s.add(Parameter::new("a", 1.0)).unwrap();
    let b = s.add(Parameter::new("b", 2.0)).unwrap();
    let group = s.add(BaseObj::new("g").with_child("a", &a)).unwrap();
    s.set_child(&group, "b", &b).unwrap();

    s.remove(&a).unwrap();
    s.undo().unwrap();
    let children: Vec<(String, String)> = s
        .group(&group)
        .unwrap()
        .children()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    assert_eq!(children, vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())]);
    assert_eq!(s.get_parameters(&group).unwrap(), vec![a, b]);
}

#[test]
fn history_errors() {
    let mut s = recording_session();
    assert_err_contains(s.undo(), "nothing to undo");
    assert_err_contains(s.redo(), "nothing to redo");
    s.begin_macro("open").unwrap();
    assert!(matches!(s.undo(), Err(CoreError::Stack(_))));
    s.end_macro().unwrap();
    assert!(!s.stack().can_undo());
}

#[test]
fn disabled_stack_records_nothing() {
    let mut s = Session::new();
    let key = parameter(&mut s);
    s.set_value(&key, 3.0).unwrap();
    assert!(!s.stack().can_undo());
    s.stack_mut().set_enabled(true);
    s.set_value(&key, 4.0).unwrap();
    assert!(s.stack().can_undo());
}
