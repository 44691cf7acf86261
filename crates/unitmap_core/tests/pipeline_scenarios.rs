use geo::{coord, polygon, Area, Polygon};
use rusqlite::Connection;
use unitmap_core::db::open_db_in_memory;
use unitmap_core::model::domain::{DomainError, UNIT_CODE_DOMAIN};
use unitmap_core::model::tolerance::ToleranceError;
use unitmap_core::repo::feature_repo::DatasetKind;
use unitmap_core::{
    derive_unit_polygons, ConfigError, FeatureRepository, JoinError, JoinWarning, LineFeature,
    LineSet, PipelineConfig, PipelineError, PipelineService, PolygonId, SnapOptions,
    SqliteFeatureRepository, SqliteUnitRepository, TopologyError, UnitPolygon, UnitRepository,
    ValidUnit,
};

fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
}

fn boundary_ring() -> LineSet {
    LineSet::new(vec![LineFeature::from_xy(&[
        (0.0, 0.0),
        (1.0, 0.0),
        (1.0, 1.0),
        (0.0, 1.0),
        (0.0, 0.0),
    ])])
}

/// Store with a unit-square boundary and the given contacts.
fn store_with(contacts: &[&[(f64, f64)]]) -> Connection {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteFeatureRepository::new(&conn);
    repo.create_dataset("Map_boundary", DatasetKind::Line, None)
        .unwrap();
    repo.insert_lines("Map_boundary", &boundary_ring()).unwrap();
    repo.create_dataset("Contacts", DatasetKind::Line, None).unwrap();
    let lines: LineSet = contacts
        .iter()
        .map(|points| LineFeature::from_xy(points))
        .collect();
    repo.insert_lines("Contacts", &lines).unwrap();
    conn
}

fn add_units(conn: &Connection, codes: &[(i64, &str)]) {
    let units = SqliteUnitRepository::new(conn);
    for (code, name) in codes {
        units
            .add_unit(&ValidUnit {
                unit_code: *code,
                unit_name: name.to_string(),
            })
            .unwrap();
    }
}

fn add_prior(conn: &Connection, name: &str, polygons: &[(Polygon<f64>, Option<i64>)]) {
    let repo = SqliteFeatureRepository::new(conn);
    repo.create_dataset(name, DatasetKind::Polygon, None).unwrap();
    let rows: Vec<UnitPolygon> = polygons
        .iter()
        .enumerate()
        .map(|(index, (geometry, unit_code))| UnitPolygon {
            id: PolygonId(index),
            geometry: geometry.clone(),
            unit_code: *unit_code,
        })
        .collect();
    repo.insert_polygons(name, &rows, None).unwrap();
}

fn service(conn: &Connection) -> PipelineService<SqliteFeatureRepository<'_>, SqliteUnitRepository<'_>> {
    PipelineService::new(
        SqliteFeatureRepository::new(conn),
        SqliteUnitRepository::new(conn),
    )
}

fn config(prior: Option<&str>) -> PipelineConfig {
    PipelineConfig {
        prior: prior.map(str::to_string),
        tolerance: Some(0.01),
        ..PipelineConfig::default()
    }
}

#[test]
fn split_square_inherits_code_from_whole_prior() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke")]);
    add_prior(&conn, "Units", &[(square(0.0, 0.0, 1.0, 1.0), Some(7))]);

    let report = service(&conn).run(&config(Some("Units"))).unwrap();

    assert_eq!(report.output_dataset, "Units1");
    assert_eq!(report.polygons.len(), 2);
    assert!(report.polygons.iter().all(|p| p.unit_code == Some(7)));
    assert!(report.warnings.is_empty());
    let area: f64 = report.polygons.iter().map(|p| p.geometry.unsigned_area()).sum();
    assert!((area - 1.0).abs() < 1e-9);

    let stored = SqliteFeatureRepository::new(&conn)
        .load_polygons("Units1")
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|p| p.unit_code == Some(7)));
}

#[test]
fn first_run_without_prior_leaves_polygons_unattributed() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);

    let report = service(&conn).run(&config(None)).unwrap();

    assert_eq!(report.output_dataset, "Units");
    assert_eq!(report.prior_dataset, None);
    assert_eq!(report.polygons.len(), 2);
    assert!(report.polygons.iter().all(|p| p.unit_code.is_none()));
    assert!(report.warnings.is_empty());
}

#[test]
fn repeated_runs_version_output_names() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke")]);

    let first = service(&conn).run(&config(None)).unwrap();
    assert_eq!(first.output_dataset, "Units");

    let second = service(&conn).run(&config(None)).unwrap();
    assert_eq!(second.output_dataset, "Units1");

    let third = service(&conn).run(&config(Some("Units1"))).unwrap();
    assert_eq!(third.output_dataset, "Units2");
    // Priors carry no codes yet, so every polygon is reported.
    assert_eq!(third.warnings.len(), 2);
}

#[test]
fn polygon_outside_prior_is_reported_and_recorded() {
    let conn = store_with(&[&[(0.5, 0.0), (0.5, 1.0)]]);
    add_units(&conn, &[(3, "Limestone")]);
    add_prior(&conn, "Units", &[(square(0.0, 0.0, 0.5, 1.0), Some(3))]);

    let report = service(&conn).run(&config(Some("Units"))).unwrap();

    assert_eq!(report.polygons[0].unit_code, Some(3));
    assert_eq!(report.polygons[1].unit_code, None);
    assert_eq!(
        report.warnings,
        vec![JoinWarning::Unattributed {
            polygon_id: PolygonId(1)
        }]
    );

    let recorded = SqliteFeatureRepository::new(&conn)
        .list_run_warnings(report.run_id)
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, "unattributed");
    assert_eq!(recorded[0].polygon_id, 1);
}

#[test]
fn dangling_contact_fails_without_writing_output() {
    let conn = store_with(&[&[(0.5, 0.5), (1.0, 0.5)]]);

    let err = service(&conn).run(&config(None)).unwrap_err();

    match err {
        PipelineError::Topology(TopologyError::OpenContact { vertex, feature }) => {
            assert_eq!(vertex, coord! { x: 0.5, y: 0.5 });
            assert_eq!(feature, Some(0));
        }
        other => panic!("unexpected error: {other}"),
    }
    let repo = SqliteFeatureRepository::new(&conn);
    assert!(repo.get_dataset("Units").unwrap().is_none());
}

#[test]
fn undershoot_is_snapped_and_optionally_written_back() {
    let conn = store_with(&[&[(0.003, 0.5), (1.0, 0.5)]]);
    let config = PipelineConfig {
        write_snapped_contacts: true,
        ..config(None)
    };

    let report = service(&conn).run(&config).unwrap();

    assert_eq!(report.polygons.len(), 2);
    assert_eq!(report.snap.boundary_snaps, 1);
    let contacts = SqliteFeatureRepository::new(&conn)
        .load_lines("Contacts")
        .unwrap();
    let start = contacts.features()[0].geometry.0[0];
    assert!(start.x.abs() < 1e-12);
    assert!((start.y - 0.5).abs() < 1e-12);
}

#[test]
fn duplicate_valid_unit_codes_fail_the_run() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(4, "Basalt"), (4, "Dolerite")]);

    let err = service(&conn).run(&config(None)).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Domain(DomainError::DuplicateDomainCode { code: 4, .. })
    ));
}

#[test]
fn prior_code_missing_from_valid_units_fails_with_attempt() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke")]);
    add_prior(&conn, "Units", &[(square(0.0, 0.0, 1.0, 1.0), Some(9))]);

    let err = service(&conn).run(&config(Some("Units"))).unwrap_err();

    match err {
        PipelineError::Join(JoinError::UnknownUnitCodes {
            violations,
            attempt,
        }) => {
            assert_eq!(violations.len(), 2);
            assert!(violations.iter().all(|v| v.code == 9));
            assert_eq!(attempt.polygons.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    let repo = SqliteFeatureRepository::new(&conn);
    assert!(repo.get_dataset("Units1").unwrap().is_none());
}

#[test]
fn tolerance_comes_from_map_scale_or_fails() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);

    let from_scale = PipelineConfig {
        map_scale: Some(20.0),
        ..PipelineConfig::default()
    };
    let report = service(&conn).run(&from_scale).unwrap();
    assert!((report.tolerance - 0.01).abs() < 1e-12);

    let err = service(&conn).run(&PipelineConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Tolerance(ToleranceError::Missing)
    ));
}

#[test]
fn polygon_boundary_dataset_is_accepted() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_prior(&conn, "Outline", &[(square(0.0, 0.0, 1.0, 1.0), None)]);

    let config = PipelineConfig {
        boundary: "Outline".to_string(),
        ..config(None)
    };
    let report = service(&conn).run(&config).unwrap();
    assert_eq!(report.polygons.len(), 2);
}

#[test]
fn run_refreshes_stored_unit_code_domain() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke"), (2, "Chert")]);

    service(&conn).run(&config(None)).unwrap();

    let domain = SqliteUnitRepository::new(&conn)
        .load_domain(UNIT_CODE_DOMAIN)
        .unwrap();
    assert_eq!(
        domain.entries().collect::<Vec<_>>(),
        vec![(2, "Chert"), (7, "Greywacke")]
    );
}

#[test]
fn in_memory_derivation_splits_square_into_quadrants() {
    let contacts = LineSet::new(vec![
        LineFeature::from_xy(&[(0.0, 0.5), (1.0, 0.5)]),
        LineFeature::from_xy(&[(0.5, 0.0), (0.5, 1.0)]),
    ]);

    let derivation = derive_unit_polygons(
        &contacts,
        &boundary_ring(),
        0.01,
        &SnapOptions::default(),
        None,
    )
    .unwrap();

    assert_eq!(derivation.polygons.len(), 4);
    for polygon in &derivation.polygons {
        assert!((polygon.geometry.unsigned_area() - 0.25).abs() < 1e-9);
    }
    assert!(derivation.warnings.is_empty());
}

#[test]
fn padded_output_name_fails_before_any_write() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke")]);
    let config = PipelineConfig {
        units: "Units ".to_string(),
        ..config(None)
    };

    let err = service(&conn).run(&config).unwrap_err();

    assert!(matches!(err, PipelineError::Config(ConfigError::InvalidValue(_))));
    assert_eq!(err.code(), "invalid_config");
    let repo = SqliteFeatureRepository::new(&conn);
    assert!(repo.get_dataset("Units").unwrap().is_none());
    assert!(repo.get_dataset("Units ").unwrap().is_none());
    let domain = SqliteUnitRepository::new(&conn)
        .load_domain(UNIT_CODE_DOMAIN)
        .unwrap();
    assert!(domain.is_empty());
}

#[test]
fn failed_join_leaves_stored_domain_untouched() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);
    add_units(&conn, &[(7, "Greywacke")]);
    add_prior(&conn, "Units", &[(square(0.0, 0.0, 1.0, 1.0), Some(9))]);

    assert!(service(&conn).run(&config(Some("Units"))).is_err());

    let domain = SqliteUnitRepository::new(&conn)
        .load_domain(UNIT_CODE_DOMAIN)
        .unwrap();
    assert!(domain.is_empty());
    let datasets = SqliteFeatureRepository::new(&conn).list_datasets().unwrap();
    assert_eq!(
        datasets.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        vec!["Contacts", "Map_boundary", "Units"]
    );
}

#[test]
fn run_context_ends_with_the_run() {
    let conn = store_with(&[&[(0.0, 0.5), (1.0, 0.5)]]);

    let report = service(&conn).run(&config(None)).unwrap();

    assert!(!report.run_id.is_nil());
    assert_eq!(unitmap_core::logging::current_run(), None);
}
