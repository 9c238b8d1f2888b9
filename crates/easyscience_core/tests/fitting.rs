use easyscience_core::fitting::{result_key, FIT_MACRO};
use easyscience_core::{
    Constraint, FitSettings, Fitter, Line, Parameter, Polynomial, Session, SessionSettings,
};

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Deterministic noise in `[0, 1)`.
fn noise(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| ((i as f64 * 12.9898).sin() * 43758.5453).fract().abs())
        .collect()
}

fn recording_session() -> Session {
    Session::with_settings(SessionSettings {
        undo_enabled: true,
        ..Default::default()
    })
}

#[test]
fn fit_results_are_one_undo_step() {
    let (m_value, c_value) = (6.0, 2.0);
    let x = linspace(-5.0, 5.0, 100);
    let y: Vec<f64> = x
        .iter()
        .zip(noise(x.len()))
        .map(|(xi, dy)| m_value * xi + c_value + 0.125 * (dy - 0.5))
        .collect();

    let mut session = recording_session();
    let (m_sp, c_sp) = (4.0, -3.0);
    let line = Line::with_coefficients(&mut session, m_sp, c_sp).unwrap();
    let results = Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();

    assert!(results.success, "{}", results.message);
    assert!((session.value(line.m()).unwrap() - m_value).abs() < 0.01);
    assert!((session.value(line.c()).unwrap() - c_value).abs() < 0.05);
    assert_eq!(session.stack().undo_text(), Some(FIT_MACRO));

    session.undo().unwrap();
    assert_eq!(session.value(line.m()).unwrap(), m_sp);
    assert_eq!(session.value(line.c()).unwrap(), c_sp);
    assert_eq!(session.parameter(line.m()).unwrap().error(), None);
    assert_eq!(session.stack().redo_text(), Some(FIT_MACRO));

    session.redo().unwrap();
    assert_eq!(session.value(line.m()).unwrap(), results.parameters[&result_key(line.m())]);
    assert_eq!(session.value(line.c()).unwrap(), results.parameters[&result_key(line.c())]);
}

#[test]
fn polynomial_fit_with_weights() {
    let x = linspace(0.0, 4.0, 40);
    let truth = [0.5, -2.0, 1.0];
    let y: Vec<f64> = x
        .iter()
        .map(|&xi| truth.iter().fold(0.0, |acc, c| acc * xi + c))
        .collect();
    let weights = vec![2.0; x.len()];

    let mut session = Session::new();
    let poly = Polynomial::new(&mut session, "poly", [1.0, 1.0, 1.0]).unwrap();
    let results = Fitter::default()
        .fit(&mut session, &poly, &x, &y, Some(weights.as_slice()))
        .unwrap();

    assert!(results.success);
    for (key, expected) in poly.coefficients().iter().zip(truth) {
        assert!((session.value(key).unwrap() - expected).abs() < 1e-6);
    }
    assert!(results.residuals.iter().all(|r| r.abs() < 1e-6));
    assert_eq!(results.y_obs, y);
}

#[test]
fn constrained_parameters_track_the_fit() {
    let x = linspace(0.0, 1.0, 10);
    let y: Vec<f64> = x.iter().map(|xi| 3.0 * xi + 1.0).collect();

    let mut session = Session::new();
    let line = Line::new(&mut session).unwrap();
    let twice_m = session.add(Parameter::new("twice_m", 0.0)).unwrap();
    session
        .constrain(line.m(), "twice", Constraint::object(&twice_m, "2*", line.m()).unwrap())
        .unwrap();

    Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
    let m = session.value(line.m()).unwrap();
    assert!((m - 3.0).abs() < 1e-8);
    assert_eq!(session.value(&twice_m).unwrap(), 2.0 * m);
}

#[test]
fn constrained_model_parameters_follow_each_trial() {
    let x = linspace(-2.0, 2.0, 20);
    let y: Vec<f64> = x.iter().map(|xi| 3.0 * xi + 6.0).collect();

    let mut session = recording_session();
    let line = Line::new(&mut session).unwrap();
    let offset = Constraint::object(line.c(), "2*", line.m()).unwrap();
    session.constrain(line.m(), "offset", offset).unwrap();

    let results = Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
    assert!(results.success, "{}", results.message);
    assert_eq!(results.parameters.len(), 1);
    let m = session.value(line.m()).unwrap();
    assert!((m - 3.0).abs() < 1e-6, "m = {m}");
    assert_eq!(session.value(line.c()).unwrap(), 2.0 * m);
    assert!(results.chi2 < 1e-8);
    for (calc, obs) in results.y_calc.iter().zip(&y) {
        assert!((calc - obs).abs() < 1e-5);
    }
}

#[test]
fn iteration_limit_is_reported() {
    let x = linspace(0.0, 1.0, 10);
    let y: Vec<f64> = x.iter().map(|xi| (5.0 * xi).exp()).collect();

    let mut session = Session::new();
    let poly = Polynomial::new(&mut session, "poly", [0.0, 0.0, 0.0, 0.0]).unwrap();
    let fitter = Fitter::new(FitSettings {
        max_iterations: 1,
        ..Default::default()
    });
    let results = fitter.fit(&mut session, &poly, &x, &y, None).unwrap();
    assert_eq!(results.iterations, 1);
    assert!(!results.success);
    assert!(results.message.contains("maximum"));
}
