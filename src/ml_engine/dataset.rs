//! Training data ingestion
//!
//! Cycle files are header-less CSV with flexible record lengths, or Excel
//! workbooks whose `Sheet1` holds the same rows. Records come in pairs,
//! angle first and torque second, laid out as
//! `identifier, label, channel, sample, sample, ...`. Only the label and the
//! samples are used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, warn};

use super::features::flatten;
use super::segmenter::segment;
use crate::config::RelabelRule;
use crate::types::Label;

/// First sample column of a cycle record.
const SAMPLE_OFFSET: usize = 3;

/// Worksheet holding the cycle rows of a workbook.
const WORKBOOK_SHEET: &str = "Sheet1";

/// Extensions read as workbooks; everything else listed is CSV.
const WORKBOOK_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {}: {}", .0.display(), .1)]
    Csv(PathBuf, #[source] csv::Error),
    #[error("failed to read workbook {}: {}", .0.display(), .1)]
    Workbook(PathBuf, #[source] calamine::Error),
    #[error("failed to list {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
}

/// One tightening cycle as stored in a cycle file.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub identifier: String,
    /// Raw label before relabeling
    pub raw_label: i64,
    pub angle: Vec<f64>,
    pub torque: Vec<f64>,
}

/// Windowed rows and labels of one folder at one window size.
#[derive(Debug, Clone, Default)]
pub struct WindowDataset {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<Label>,
}

impl WindowDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn extend(&mut self, other: Self) {
        self.rows.extend(other.rows);
        self.labels.extend(other.labels);
    }
}

/// Raw label → class rewrites, applied before a label must be 0 or 1.
#[derive(Debug, Clone, Default)]
pub struct Relabel {
    map: HashMap<i64, u8>,
}

impl Relabel {
    pub fn new(rules: &[RelabelRule]) -> Self {
        Self {
            map: rules.iter().map(|r| (r.from, r.to)).collect(),
        }
    }

    pub fn apply(&self, raw: i64) -> Option<Label> {
        let class = match self.map.get(&raw) {
            Some(to) => *to,
            None => u8::try_from(raw).ok()?,
        };
        Label::from_class(class)
    }
}

/// Parse every cycle of one file, CSV or workbook by extension.
pub fn read_cycles(path: &Path) -> Result<Vec<CycleRecord>, DatasetError> {
    let rows = if is_workbook(path) {
        workbook_rows(path)?
    } else {
        csv_rows(path)?
    };
    Ok(pair_cycles(path, &rows))
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| WORKBOOK_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
}

fn csv_rows(path: &Path) -> Result<Vec<Vec<String>>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DatasetError::Csv(path.to_path_buf(), e))?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DatasetError::Csv(path.to_path_buf(), e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn workbook_rows(path: &Path) -> Result<Vec<Vec<String>>, DatasetError> {
    let workbook_err = |e| DatasetError::Workbook(path.to_path_buf(), e);
    let mut workbook = open_workbook_auto(path).map_err(workbook_err)?;
    let range = workbook.worksheet_range(WORKBOOK_SHEET).map_err(workbook_err)?;

    // The range starts at the first used cell, not at A1
    let (_, first_col) = range.start().unwrap_or((0, 0));
    let lead = first_col as usize;
    Ok(range
        .rows()
        .map(|row| {
            std::iter::repeat(String::new())
                .take(lead)
                .chain(row.iter().map(cell_text))
                .collect()
        })
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        other => other.to_string(),
    }
}

fn pair_cycles(path: &Path, rows: &[Vec<String>]) -> Vec<CycleRecord> {
    let records: Vec<&Vec<String>> = rows
        .iter()
        .filter(|row| !row.iter().all(|cell| cell.trim().is_empty()))
        .collect();

    let mut cycles = Vec::with_capacity(records.len() / 2);
    for (pair_idx, pair) in records.chunks(2).enumerate() {
        let [angle, torque] = pair else {
            debug!(path = %path.display(), "Ignoring unpaired trailing record");
            break;
        };
        let label_cell = angle.get(1).map_or("", String::as_str);
        let Some(raw_label) = parse_label(label_cell) else {
            warn!(
                path = %path.display(),
                cycle = pair_idx,
                label = label_cell,
                "Skipping cycle with non-numeric label"
            );
            continue;
        };
        cycles.push(CycleRecord {
            identifier: angle.first().map_or("", String::as_str).trim().to_string(),
            raw_label,
            angle: samples(angle),
            torque: samples(torque),
        });
    }
    cycles
}

fn parse_label(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        // Spreadsheet exports write integral labels as "1.0"
        let f = cell.parse::<f64>().ok()?;
        (f.fract() == 0.0 && f.is_finite()).then_some(f as i64)
    })
}

fn samples(record: &[String]) -> Vec<f64> {
    record
        .iter()
        .skip(SAMPLE_OFFSET)
        .filter_map(|cell| cell.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// Window one cycle. Every window inherits the cycle's label.
pub fn window_cycle(cycle: &CycleRecord, label: Label, window_size: usize) -> WindowDataset {
    let rows: Vec<Vec<f64>> = segment(&cycle.angle, &cycle.torque, window_size)
        .iter()
        .map(flatten)
        .collect();
    let labels = vec![label; rows.len()];
    WindowDataset { rows, labels }
}

/// Sorted `*.csv` and workbook files directly inside `folder`. Office lock
/// files (`~$name.xlsx`) are skipped.
pub fn cycle_files(folder: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = std::fs::read_dir(folder).map_err(|e| DatasetError::Io(folder.to_path_buf(), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_cycle_file(p))
        .collect();
    files.sort();
    Ok(files)
}

fn is_cycle_file(path: &Path) -> bool {
    let lock_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"));
    let csv = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    !lock_file && (csv || is_workbook(path))
}

/// Sorted sub-directories of the data dir; each one is a model folder.
pub fn model_folders(data_dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = std::fs::read_dir(data_dir).map_err(|e| DatasetError::Io(data_dir.to_path_buf(), e))?;
    let mut folders: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();
    Ok(folders)
}

/// Load, relabel and window every cycle file of one folder.
pub fn load_folder(folder: &Path, window_size: usize, relabel: &Relabel) -> Result<WindowDataset, DatasetError> {
    let mut dataset = WindowDataset::default();
    for file in cycle_files(folder)? {
        let mut from_file = WindowDataset::default();
        for cycle in read_cycles(&file)? {
            let Some(label) = relabel.apply(cycle.raw_label) else {
                warn!(
                    file = %file.display(),
                    identifier = %cycle.identifier,
                    raw_label = cycle.raw_label,
                    "Skipping cycle with unknown label"
                );
                continue;
            };
            from_file.extend(window_cycle(&cycle, label, window_size));
        }
        if from_file.is_empty() {
            debug!(file = %file.display(), window_size, "File produced no windows");
            continue;
        }
        debug!(file = %file.display(), window_size, windows = from_file.len(), "Loaded cycle file");
        dataset.extend(from_file);
    }
    Ok(dataset)
}

/// Seeded shuffle split; the test side gets `ceil(n * test_fraction)` rows.
pub fn train_test_split(dataset: WindowDataset, test_fraction: f64, seed: u64) -> (WindowDataset, WindowDataset) {
    let n = dataset.len();
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    let n_test = n_test.min(n);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut rows: Vec<Option<Vec<f64>>> = dataset.rows.into_iter().map(Some).collect();
    let mut take = |indices: &[usize]| {
        let mut part = WindowDataset::default();
        for &i in indices {
            if let Some(row) = rows[i].take() {
                part.rows.push(row);
                part.labels.push(dataset.labels[i]);
            }
        }
        part
    };
    let test = take(&order[..n_test]);
    let train = take(&order[n_test..]);
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_cycles_pairs_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "cycles.csv",
            "B-1,0,angle,1,2,3,4\n\
             B-1,0,torque,10,20,30\n\
             ,,,,\n\
             B-2,2.0,angle,5,6,,7\n\
             B-2,2.0,torque,50,60,70,80\n\
             B-3,x,angle,1\n\
             B-3,x,torque,1\n\
             B-4,1,angle,9\n",
        );
        let cycles = read_cycles(&path).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].identifier, "B-1");
        assert_eq!(cycles[0].raw_label, 0);
        assert_eq!(cycles[0].angle, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(cycles[0].torque, vec![10.0, 20.0, 30.0]);
        assert_eq!(cycles[1].raw_label, 2);
        // Blank sample cells are dropped
        assert_eq!(cycles[1].angle, vec![5.0, 6.0, 7.0]);
    }

    /// Workbook with a decoy first sheet and the cycles on `Sheet1`.
    fn write_workbook(path: &Path, cycles: &[(&str, f64, &[f64], &[f64])]) {
        let mut workbook = Workbook::new();
        workbook
            .add_worksheet()
            .set_name("Notes")
            .unwrap()
            .write_string(0, 0, "B-0,0,angle,1")
            .unwrap();
        let sheet = workbook.add_worksheet().set_name("Sheet1").unwrap();
        let mut row = 0;
        for (identifier, label, angle, torque) in cycles {
            for (channel, values) in [("angle", angle), ("torque", torque)] {
                sheet.write_string(row, 0, *identifier).unwrap();
                sheet.write_number(row, 1, *label).unwrap();
                sheet.write_string(row, 2, channel).unwrap();
                for (col, v) in values.iter().enumerate() {
                    sheet.write_number(row, 3 + col as u16, *v).unwrap();
                }
                row += 1;
            }
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_read_cycles_from_workbook_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycles.xlsx");
        write_workbook(
            &path,
            &[
                ("B-1", 0.0, &[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]),
                ("B-2", 2.0, &[4.0, 5.0], &[40.0, 50.0, 60.0]),
            ],
        );

        let cycles = read_cycles(&path).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].identifier, "B-1");
        assert_eq!(cycles[0].raw_label, 0);
        assert_eq!(cycles[0].angle, vec![1.0, 2.0, 3.0]);
        assert_eq!(cycles[0].torque, vec![10.0, 20.0, 30.0]);
        assert_eq!(cycles[1].raw_label, 2);
        assert_eq!(cycles[1].torque, vec![40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_workbook_without_cycle_sheet_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.xlsx");
        let mut workbook = Workbook::new();
        workbook.add_worksheet().set_name("Data").unwrap();
        workbook.save(&path).unwrap();
        assert!(matches!(read_cycles(&path), Err(DatasetError::Workbook(..))));
    }

    #[test]
    fn test_load_folder_mixes_csv_and_workbooks() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.csv", "A,0,angle,1,2,3,4\nA,0,torque,1,2,3,4\n");
        write_workbook(&dir.path().join("b.xlsx"), &[("B", 1.0, &[1.0, 2.0, 3.0], &[5.0, 6.0, 7.0])]);
        write_file(dir.path(), "~$b.xlsx", "lock");

        let files = cycle_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.csv"), dir.path().join("b.xlsx")]);

        let ds = load_folder(dir.path(), 2, &Relabel::default()).unwrap();
        assert_eq!(ds.labels, vec![Label::Ok, Label::Ok, Label::NotOk]);
        assert_eq!(ds.rows[2], vec![1.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_relabel_folds_two_into_not_ok() {
        let relabel = Relabel::new(&[RelabelRule { from: 2, to: 1 }]);
        assert_eq!(relabel.apply(0), Some(Label::Ok));
        assert_eq!(relabel.apply(1), Some(Label::NotOk));
        assert_eq!(relabel.apply(2), Some(Label::NotOk));
        assert_eq!(relabel.apply(3), None);
        assert_eq!(relabel.apply(-1), None);
    }

    #[test]
    fn test_window_cycle_inherits_label() {
        let cycle = CycleRecord {
            identifier: "B-9".into(),
            raw_label: 1,
            angle: (0..9).map(f64::from).collect(),
            torque: (0..9).map(|v| f64::from(v) * 10.0).collect(),
        };
        let ds = window_cycle(&cycle, Label::NotOk, 4);
        assert_eq!(ds.len(), 2);
        assert!(ds.labels.iter().all(|l| *l == Label::NotOk));
        assert_eq!(ds.rows[1], vec![4.0, 5.0, 6.0, 7.0, 40.0, 50.0, 60.0, 70.0]);
    }

    #[test]
    fn test_load_folder_skips_short_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.csv", "A,0,angle,1,2,3,4,5\nA,0,torque,1,2,3,4,5\n");
        write_file(dir.path(), "b.csv", "B,1,angle,1,2\nB,1,torque,1,2\n");
        write_file(dir.path(), "notes.txt", "ignored");
        let ds = load_folder(dir.path(), 2, &Relabel::default()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.labels, vec![Label::Ok, Label::Ok]);
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let ds = WindowDataset {
            rows: (0..11).map(|i| vec![f64::from(i)]).collect(),
            labels: vec![Label::Ok; 11],
        };
        let (train, test) = train_test_split(ds.clone(), 0.2, 42);
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
        let (train2, test2) = train_test_split(ds, 0.2, 42);
        assert_eq!(train.rows, train2.rows);
        assert_eq!(test.rows, test2.rows);

        let mut all: Vec<f64> = train.rows.iter().chain(&test.rows).map(|r| r[0]).collect();
        all.sort_by(f64::total_cmp);
        assert_eq!(all, (0..11).map(f64::from).collect::<Vec<_>>());
    }
}
