use oenometrics::data::{OUTCOME_NAME, PREDICTOR_NAMES, WineColor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

// Location and spread of each predictor, roughly matching the public tables.
const RED_PROFILE: [(f64, f64); 11] = [
    (8.3, 1.7),
    (0.53, 0.18),
    (0.27, 0.19),
    (2.5, 1.0),
    (0.087, 0.03),
    (15.9, 9.0),
    (46.0, 25.0),
    (0.9967, 0.0018),
    (3.31, 0.15),
    (0.66, 0.17),
    (10.4, 1.0),
];

const WHITE_PROFILE: [(f64, f64); 11] = [
    (6.85, 0.84),
    (0.28, 0.1),
    (0.33, 0.12),
    (6.4, 4.0),
    (0.046, 0.02),
    (35.0, 15.0),
    (138.0, 40.0),
    (0.994, 0.002),
    (3.19, 0.15),
    (0.49, 0.11),
    (10.5, 1.2),
];

/// Writes a semicolon-separated table with the real header and `rows` synthetic
/// observations. Quality rises with alcohol and falls with volatile acidity.
pub fn write_wine_csv(path: &Path, color: WineColor, rows: usize, seed: u64) {
    let profile = match color {
        WineColor::Red => RED_PROFILE,
        WineColor::White => WHITE_PROFILE,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut text = String::new();
    let header: Vec<String> = PREDICTOR_NAMES
        .iter()
        .chain(std::iter::once(&OUTCOME_NAME))
        .map(|name| format!("\"{name}\""))
        .collect();
    writeln!(text, "{}", header.join(";")).unwrap();

    for _ in 0..rows {
        let z: Vec<f64> = (0..11).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
        let noise: f64 = rng.sample(StandardNormal);
        let quality = (5.7 + 0.6 * z[10] - 0.4 * z[1] + 0.5 * noise)
            .round()
            .clamp(3.0, 9.0);
        let cells: Vec<String> = profile
            .iter()
            .zip(&z)
            .map(|(&(mean, sd), &v)| format!("{:.5}", mean + sd * v))
            .chain(std::iter::once(format!("{quality}")))
            .collect();
        writeln!(text, "{}", cells.join(";")).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// Appends one red row whose total sulfur dioxide exceeds the default threshold.
pub fn append_sulfur_outlier(path: &Path) {
    let mut text = fs::read_to_string(path).unwrap();
    text.push_str("7.4;0.7;0;1.9;0.076;11;300;0.9978;3.51;0.56;9.4;5\n");
    fs::write(path, text).unwrap();
}

pub struct WineFiles {
    pub red: PathBuf,
    pub white: PathBuf,
}

pub fn write_wine_files(dir: &Path) -> WineFiles {
    let red = dir.join(WineColor::Red.default_file_name());
    let white = dir.join(WineColor::White.default_file_name());
    write_wine_csv(&red, WineColor::Red, 150, 11);
    append_sulfur_outlier(&red);
    write_wine_csv(&white, WineColor::White, 160, 12);
    WineFiles { red, white }
}
