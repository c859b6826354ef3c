//! Built-in and External Task Definitions
//!
//! Task definitions are JSON files. The benchmark set is embedded into the
//! binary; users can add or override tasks by pointing the CLI at a
//! directory of JSON files without recompiling.

use std::path::{Path, PathBuf};

const EMBEDDED_VDIV_BUS_SENSE: &str = include_str!("../../library/tasks/01_vdiv_bus_sense.json");
const EMBEDDED_LDO_AUX_LOGIC: &str = include_str!("../../library/tasks/05_ldo_aux_logic.json");
const EMBEDDED_HB_TO2473_STAGE: &str = include_str!("../../library/tasks/08_hb_to2473_stage.json");
const EMBEDDED_HB_TO2474K_SIC_STAGE: &str =
    include_str!("../../library/tasks/09_hb_to2474k_sic_stage.json");
const EMBEDDED_DRV_BOOTSTRAP_HB: &str = include_str!("../../library/tasks/14_drv_bootstrap_hb.json");
const EMBEDDED_DRV_ISOLATED_GATE: &str =
    include_str!("../../library/tasks/15_drv_isolated_gate.json");

/// (source name, JSON) for every embedded task.
pub fn embedded_tasks() -> Vec<(&'static str, &'static str)> {
    vec![
        ("01_vdiv_bus_sense.json", EMBEDDED_VDIV_BUS_SENSE),
        ("05_ldo_aux_logic.json", EMBEDDED_LDO_AUX_LOGIC),
        ("08_hb_to2473_stage.json", EMBEDDED_HB_TO2473_STAGE),
        ("09_hb_to2474k_sic_stage.json", EMBEDDED_HB_TO2474K_SIC_STAGE),
        ("14_drv_bootstrap_hb.json", EMBEDDED_DRV_BOOTSTRAP_HB),
        ("15_drv_isolated_gate.json", EMBEDDED_DRV_ISOLATED_GATE),
    ]
}

/// Task JSON files in `dir` and `dir/tasks`, sorted by path.
/// `catalog.json` is not a task file.
pub fn task_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for candidate in [dir.to_path_buf(), dir.join("tasks")] {
        if !candidate.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&candidate)?.flatten() {
            let path = entry.path();
            let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
            let is_catalog = path
                .file_name()
                .map(|n| n == "catalog.json")
                .unwrap_or(false);
            if path.is_file() && is_json && !is_catalog {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
