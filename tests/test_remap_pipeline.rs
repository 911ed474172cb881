use approx::assert_relative_eq;
use chrono::{DateTime, Utc};
use ndarray::{array, Array2};
use swath2grid::core::remap::{GridStatus, ProductStatus};
use swath2grid::{
    EwaParams, GridDefinition, GridRegistry, NearestParams, RemapConfig, RemapOptions, Remapper, ResampleMethod,
    ScanGeometry, SwathDefinition, SwathProduct, SwathScene,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_600_000_000, 0).expect("valid timestamp")
}

/// 5x5 lat/lon grid where cell (r, c) is centered on lat = r, lon = c
fn test_registry() -> GridRegistry {
    let mut registry = GridRegistry::builtin();
    registry.register(
        GridDefinition::new("test_latlon", "+proj=latlong +ellps=WGS84", 0.0, 0.0, 1.0, 1.0, 5, 5)
            .expect("valid grid"),
    );
    registry.register(
        GridDefinition::new("test_latlon_shifted", "+proj=latlong +ellps=WGS84", -1.0, -1.0, 1.0, 1.0, 5, 5)
            .expect("valid grid"),
    );
    registry
}

/// Two scan lines of two samples; the second line carries no valid data
fn two_by_two_scene(scan_geometry: ScanGeometry) -> SwathScene {
    let mut scene = SwathScene::new(scan_geometry);
    let swath = SwathDefinition::new(
        "nav",
        array![[1.0, 2.0], [1.0, 2.0]],
        array![[1.0, 1.0], [2.0, 2.0]],
        f64::NAN,
        1,
    )
    .expect("valid swath");
    scene.add_swath_definition(swath).expect("swath added");

    let mut product = SwathProduct::new(
        "brightness_temp",
        "nav",
        array![[10.0, 20.0], [f32::NAN, f32::NAN]],
        f32::NAN,
        epoch(),
        epoch(),
    );
    product.units = "K".to_string();
    scene.add_product(product).expect("product added");
    scene
}

fn same_bits(a: &Array2<f32>, b: &Array2<f32>) -> bool {
    a.dim() == b.dim() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[test]
fn test_nearest_two_by_two() {
    init_logging();

    let config = RemapConfig::new(
        ["test_latlon"],
        ResampleMethod::Nearest(NearestParams { distance_upper_bound: 0.5 }),
    );
    let output = Remapper::new(test_registry(), config).remap(&two_by_two_scene(ScanGeometry::default()));

    let scene = output.scene("test_latlon").expect("grid completed");
    let product = scene.product("brightness_temp").expect("product gridded");
    assert_eq!(product.units, "K");
    assert_eq!(product.data.dim(), (5, 5));

    for ((row, col), &value) in product.data.indexed_iter() {
        match (row, col) {
            (1, 1) => assert_eq!(value, 10.0),
            (1, 2) => assert_eq!(value, 20.0),
            _ => assert!(value.is_nan(), "cell ({}, {}) should be fill, got {}", row, col, value),
        }
    }
    assert!(output.report.is_complete_success());
}

#[test]
fn test_ewa_two_by_two_blends_neighbours() {
    init_logging();

    let scan_geometry = ScanGeometry {
        ifov_along_scan: 1.0,
        ifov_along_track: 3.0,
    };
    let method = ResampleMethod::Ewa(EwaParams {
        footprint_scale: 3.0,
        ..EwaParams::default()
    });
    let output =
        Remapper::new(test_registry(), RemapConfig::new(["test_latlon"], method)).remap(&two_by_two_scene(scan_geometry));

    let data = &output
        .scene("test_latlon")
        .expect("grid completed")
        .product("brightness_temp")
        .expect("product gridded")
        .data;

    let left = data[[1, 1]];
    let right = data[[1, 2]];
    assert!(left > 10.0 && left < 20.0, "cell (1, 1) = {}", left);
    assert!(right > 10.0 && right < 20.0, "cell (1, 2) = {}", right);
    assert!(left < right);
    assert_relative_eq!(left - 10.0, 20.0 - right, epsilon = 1e-4);

    // Cells above and below the samples are reached by both footprints
    for row in [0, 2] {
        let near_left = data[[row, 1]];
        let near_right = data[[row, 2]];
        assert!(near_left > 10.0 && near_left < 20.0, "cell ({}, 1) = {}", row, near_left);
        assert!(near_right > 10.0 && near_right < 20.0, "cell ({}, 2) = {}", row, near_right);
        assert!(near_left < 15.0 && near_right > 15.0);
        assert_relative_eq!(near_left - 10.0, 20.0 - near_right, epsilon = 1e-4);
    }

    // Invalid samples on the second line never produce values on their own
    assert!(data[[4, 4]].is_nan());
}

#[test]
fn test_ewa_small_footprints_keep_sample_values() {
    init_logging();

    let output = Remapper::new(
        test_registry(),
        RemapConfig::new(["test_latlon"], ResampleMethod::Ewa(EwaParams::default())),
    )
    .remap(&two_by_two_scene(ScanGeometry::default()));

    let data = &output.scene("test_latlon").expect("grid completed").product("brightness_temp").expect("gridded").data;
    assert_eq!(data[[1, 1]], 10.0);
    assert_eq!(data[[1, 2]], 20.0);
}

#[test]
fn test_unknown_grid_does_not_stop_other_grids() {
    init_logging();

    let config = RemapConfig::new(
        ["test_latlon", "no_such_grid", "test_latlon_shifted"],
        ResampleMethod::Nearest(NearestParams { distance_upper_bound: 0.5 }),
    );
    let output = Remapper::new(test_registry(), config).remap(&two_by_two_scene(ScanGeometry::default()));

    assert_eq!(output.scenes.len(), 2);
    let ids: Vec<&str> = output.report.grids.iter().map(|g| g.grid_id.as_str()).collect();
    assert_eq!(ids, vec!["test_latlon", "no_such_grid", "test_latlon_shifted"]);

    let failed = output.report.grid("no_such_grid").expect("reported");
    match &failed.status {
        GridStatus::Failed(reason) => assert!(reason.contains("no_such_grid")),
        other => panic!("expected a failed grid, got {:?}", other),
    }
    assert!(matches!(failed.products["brightness_temp"], ProductStatus::Skipped(_)));

    // Shifted grid: lat/lon (1, 1) lands on cell (2, 2)
    let shifted = output.scene("test_latlon_shifted").expect("grid completed");
    assert_eq!(shifted.product("brightness_temp").expect("gridded").data[[2, 2]], 10.0);
}

#[test]
fn test_remap_is_deterministic() {
    init_logging();

    let scene = two_by_two_scene(ScanGeometry {
        ifov_along_scan: 1.0,
        ifov_along_track: 2.0,
    });
    for method in [
        ResampleMethod::Nearest(NearestParams { distance_upper_bound: 1.5 }),
        ResampleMethod::Ewa(EwaParams::default()),
    ] {
        let remapper = Remapper::new(test_registry(), RemapConfig::new(["test_latlon"], method));
        let first = remapper.remap(&scene);
        let second = remapper.remap(&scene);
        let a = &first.scene("test_latlon").expect("completed").product("brightness_temp").expect("gridded").data;
        let b = &second.scene("test_latlon").expect("completed").product("brightness_temp").expect("gridded").data;
        assert!(same_bits(a, b));
        assert_eq!(first.report, second.report);
    }
}

#[test]
fn test_product_and_grid_order_do_not_matter() {
    init_logging();

    let make_scene = |reverse: bool| {
        let mut scene = SwathScene::new(ScanGeometry::default());
        scene
            .add_swath_definition(
                SwathDefinition::new("nav", array![[1.0, 2.0, 3.0]], array![[2.0, 2.0, 2.0]], f64::NAN, 1)
                    .expect("valid swath"),
            )
            .expect("swath added");
        let mut products = vec![
            SwathProduct::new("a", "nav", array![[1.0, 2.0, 3.0]], -999.0, epoch(), epoch()),
            SwathProduct::new("b", "nav", array![[4.0, -999.0, 6.0]], -999.0, epoch(), epoch()),
        ];
        if reverse {
            products.reverse();
        }
        for product in products {
            scene.add_product(product).expect("product added");
        }
        scene
    };

    let method = ResampleMethod::Nearest(NearestParams { distance_upper_bound: 2.0 });
    let forward = Remapper::new(
        test_registry(),
        RemapConfig::new(["test_latlon", "test_latlon_shifted"], method.clone()),
    )
    .remap(&make_scene(false));
    let backward = Remapper::new(
        test_registry(),
        RemapConfig::new(["test_latlon_shifted", "test_latlon"], method),
    )
    .remap(&make_scene(true));

    for grid_id in ["test_latlon", "test_latlon_shifted"] {
        let f = forward.scene(grid_id).expect("completed");
        let b = backward.scene(grid_id).expect("completed");
        assert_eq!(f.product_names(), b.product_names());
        for name in f.product_names() {
            assert!(same_bits(
                &f.product(&name).expect("gridded").data,
                &b.product(&name).expect("gridded").data
            ));
        }
    }
}

#[test]
fn test_options_drive_projected_grid() {
    init_logging();

    let dir = tempfile::tempdir().expect("temp dir");
    let grids = dir.path().join("grids.conf");
    std::fs::write(
        &grids,
        "lcc_small, proj4, +proj=lcc +ellps=WGS84 +lat_0=25 +lat_1=25 +lon_0=-95 +units=m, 20, 20, 1000, -1000, -95.0deg, 25.0deg\n",
    )
    .expect("write grid config");

    // 10x10 swath with roughly 1 km spacing south-east of the grid origin
    let lon = Array2::from_shape_fn((10, 10), |(_, j)| -95.0 + 0.0099 * (j as f64 + 1.0));
    let lat = Array2::from_shape_fn((10, 10), |(i, _)| 25.0 - 0.009 * (i as f64 + 1.0));
    let values = Array2::from_shape_fn((10, 10), |(i, j)| 100.0 + (i * 10 + j) as f32);

    let mut scene = SwathScene::new(ScanGeometry::default());
    scene
        .add_swath_definition(SwathDefinition::new("nav", lon, lat, f64::NAN, 1).expect("valid swath"))
        .expect("swath added");
    scene
        .add_product(SwathProduct::new("counts", "nav", values, f32::NAN, epoch(), epoch()))
        .expect("product added");

    for algorithm in ["nearest", "ewa"] {
        let options = RemapOptions::from_json_str(&format!(
            r#"{{"grid_ids": ["lcc_small"], "algorithm": "{}", "distance_upper_bound": 1.2,
                "grid_configs": [{:?}]}}"#,
            algorithm,
            grids.display().to_string()
        ))
        .expect("options parse");
        let output = swath2grid::remap_scene(&scene, options.into_config().expect("valid config"))
            .expect("registry loads");

        let gridded = output.scene("lcc_small").expect("grid completed");
        let coverage = gridded.coverage_percent("counts").expect("gridded");
        println!("{}: coverage {:.1}%", algorithm, coverage);
        assert!(coverage > 10.0);

        let data = &gridded.product("counts").expect("gridded").data;
        for &value in data.iter().filter(|v| !v.is_nan()) {
            assert!((100.0..200.0).contains(&value), "{} produced {}", algorithm, value);
        }
        // North-west of the origin is outside the swath
        assert!(data[[0, 0]].is_nan());
    }
}
