#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::{DateTime, TimeZone, Utc};
    use rust_xlsxwriter::Workbook;
    use tempfile::TempDir;

    use crate::prepare::workbook::TemplateBook;
    use crate::prepare::*;
    use crate::services::tabular::Cell;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 9, 15, 0).unwrap()
    }

    /// Template whose data sheet already lists `header_codes` on row 3.
    fn write_template(dir: &Path, header_codes: &[f64], stations: &[(f64, &str)]) -> PathBuf {
        let mut workbook = Workbook::new();
        let data = workbook.add_worksheet();
        data.set_name("Données").unwrap();
        data.write_string(0, 0, "Template multi-station").unwrap();
        data.write_string(2, 0, "timestamp").unwrap();
        for (i, code) in header_codes.iter().enumerate() {
            data.write_number(2, (i + 1) as u16, *code).unwrap();
        }
        let sheet = workbook.add_worksheet();
        sheet.set_name("Stations").unwrap();
        sheet.write_string(0, 0, "code").unwrap();
        sheet.write_string(0, 1, "nom").unwrap();
        for (i, (code, name)) in stations.iter().enumerate() {
            sheet.write_number((i + 1) as u32, 0, *code).unwrap();
            sheet.write_string((i + 1) as u32, 1, *name).unwrap();
        }
        let path = dir.join("template.xlsx");
        workbook.save(&path).unwrap();
        path
    }

    fn write_input(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn read_output(path: &Path) -> TemplateBook {
        TemplateBook::read(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_model_run_keeps_template_order() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[102.0], &[(101.0, "Fes"), (102.0, "Sefrou")]);
        let input = write_input(
            dir.path(),
            "arome.csv",
            "time;echance;station_id;name;station_name;rr\n\
             2024-02-01 00:00:00;1;101;p;Fes;0.5\n\
             2024-02-01 00:00:00;1;102;p;Sefrou;1.0\n\
             2024-02-01 01:00:00;2;101;p;Fes;0.0\n\
             2024-02-01 01:00:00;2;101;p;Fes;2.0\n\
             2024-02-01 03:00:00;4;102;p;Sefrou;3.0\n",
        );
        let outdir = dir.path().join("runs");
        let mut options = PrepareOptions::new(PrepareKind::PrecipModel, &input, &template, &outdir);
        options.model = Some("AROME".into());

        let outcome = run(&options, now()).unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(
            outcome.output_file,
            outdir.join("precip_arome_20240210T091500Z.xlsx")
        );
        assert!(outcome.log_file.exists());
        assert!(outcome
            .warnings
            .contains(&"Station columns added to the data sheet: 101".to_string()));
        assert!(outcome
            .warnings
            .contains(&"Duplicate (time, station_id) rows removed (keep=last): 1".to_string()));

        let book = read_output(&outcome.output_file);
        let data = book.sheet("Données").unwrap();
        assert_eq!(data.cell(2, 1), &Cell::Number(102.0));
        assert_eq!(data.cell(2, 2), &Cell::Number(101.0));
        assert_eq!(data.cell(3, 0).text(), "2024-02-01T00:00:00");
        assert_eq!(data.cell(4, 2), &Cell::Number(2.0));
        // filled with 0.0
        assert_eq!(data.cell(4, 1), &Cell::Number(0.0));
        assert_eq!(data.cell(5, 0).text(), "2024-02-01T03:00:00");

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&outcome.report_json).unwrap()).unwrap();
        assert_eq!(report["model"], "AROME");
        assert_eq!(report["time_quality"]["gap_count"], 1);
        assert_eq!(report["output_stats"]["rr_max"], 3.0);
        let text = std::fs::read_to_string(&outcome.report_txt).unwrap();
        assert!(text.starts_with("Transformation Report - Multi Station Precipitation"));
    }

    #[test]
    fn test_strict_run_fails_on_time_gaps() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[101.0], &[(101.0, "Fes")]);
        let input = write_input(
            dir.path(),
            "ecmwf.csv",
            "time;echance;station_id;name;station_name;rr\n\
             2024-02-01 00:00:00;1;101;p;Fes;0.5\n\
             2024-02-01 01:00:00;2;101;p;Fes;1.0\n\
             2024-02-01 04:00:00;5;101;p;Fes;2.0\n",
        );
        let mut options =
            PrepareOptions::new(PrepareKind::PrecipModel, &input, &template, dir.path());
        options.model = Some("ECMWF".into());
        options.strict = true;

        let outcome = run(&options, now()).unwrap();
        assert_eq!(
            outcome.warnings,
            vec!["Detected non-hourly time gaps: 1".to_string()]
        );
        assert_eq!(outcome.exit_code, 1);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&outcome.report_json).unwrap()).unwrap();
        assert_eq!(report["time_quality"]["gap_count"], 1);
        assert_eq!(report["warnings"][0], "Detected non-hourly time gaps: 1");
    }

    #[test]
    fn test_flow_run_resamples_and_matches_fuzzily() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[], &[(11.0, "Zerarda"), (12.0, "El Malha")]);
        let input = write_input(
            dir.path(),
            "debits.csv",
            "Date et heure,Zrarda Debit,Pont El Malha Debit,Oued X\n\
             01/02/2024 00:00,2,\"1,5\",7\n\
             01/02/2024 00:30,4,\"2,5\",7\n\
             01/02/2024 01:00,6,,7\n",
        );
        let mut options =
            PrepareOptions::new(PrepareKind::FlowObserved, &input, &template, dir.path());
        options.strict = true;

        let outcome = run(&options, now()).unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.warnings.iter().any(|w| w.starts_with("Fuzzy station mapping used: Zrarda Debit -> code 11")));
        assert!(outcome
            .warnings
            .contains(&"Unmapped input station columns ignored: Oued X".to_string()));

        let book = read_output(&outcome.output_file);
        let data = book.sheet("Données").unwrap();
        assert_eq!(data.cell(2, 1), &Cell::Number(11.0));
        assert_eq!(data.cell(3, 1), &Cell::Number(3.0));
        assert_eq!(data.cell(3, 2), &Cell::Number(2.0));
        assert_eq!(data.cell(4, 1), &Cell::Number(6.0));
        assert!(data.cell(4, 2).is_empty());

        let log = std::fs::read_to_string(&outcome.log_file).unwrap();
        assert!(log.contains("[ERROR] Strict mode enabled and warnings were detected."));
    }

    #[test]
    fn test_missing_input_exit_code() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[], &[(1.0, "A")]);
        let options = PrepareOptions::new(
            PrepareKind::PrecipObserved,
            dir.path().join("absent.csv"),
            &template,
            dir.path(),
        );
        let err = run(&options, now()).unwrap_err();
        assert!(matches!(err, PrepareError::InputNotFound(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_volume_rejects_sum() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[], &[(1.0, "A")]);
        let input = write_input(dir.path(), "v.csv", "Date;A Volume\n01/02/2024;1\n");
        let mut options =
            PrepareOptions::new(PrepareKind::VolumeObserved, &input, &template, dir.path());
        options.aggregation = Aggregation::Sum;
        let err = run(&options, now()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_unmapped_input_fails_and_keeps_log() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[], &[(1.0, "Fes")]);
        let input = write_input(dir.path(), "p.csv", "Date;Inconnue\n01/02/2024 00:00;1\n");
        let options =
            PrepareOptions::new(PrepareKind::PrecipObserved, &input, &template, dir.path());
        let err = run(&options, now()).unwrap_err();
        assert_eq!(err.to_string(), "No valid data after mapping/cleaning.");

        let log = dir.path().join("precip_observed_20240210T091500Z.log");
        let text = std::fs::read_to_string(log).unwrap();
        assert!(text.contains("[ERROR] No valid data after mapping/cleaning."));
    }

    #[test]
    fn test_missing_template_sheet() {
        let dir = TempDir::new().unwrap();
        let template = write_template(dir.path(), &[], &[(1.0, "Fes")]);
        let input = write_input(dir.path(), "p.csv", "Date;Fes\n01/02/2024 00:00;1\n");
        let mut options =
            PrepareOptions::new(PrepareKind::PrecipObserved, &input, &template, dir.path());
        options.sheet_data = "Data".into();
        let err = run(&options, now()).unwrap_err();
        assert_eq!(err.to_string(), "Template sheet not found: Data");
    }
}
