//! The JSON options file describing a run: datasets, network, paths and the
//! training hyper-parameters the run is named after.
//!
//! Every key is optional. Anything missing reads as unset (`None`) and is only
//! an error once something actually needs it. Keys this crate doesn't know are
//! kept, so a saved copy contains everything the user wrote.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{kernel::KernelOptions, timestamp::Timestamp};

pub const DEFAULT_OPTIONS_PATH: &str = "./options/train_usrnet.json";

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Failed to read options file {path}.")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse options file {path}.")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write options copy to {path}.")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode options.")]
    Encode(#[from] serde_json::Error),

    #[error("Option '{0}' is required but not set.")]
    Missing(&'static str),
}

fn default_task() -> String {
    "usrnet".to_owned()
}

fn default_scale() -> u32 {
    4
}

fn default_n_channels() -> u32 {
    3
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    #[serde(default = "default_task")]
    pub task: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub gpu_ids: Option<Vec<u32>>,
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default = "default_n_channels")]
    pub n_channels: u32,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetOptions>,
    #[serde(default)]
    pub path: PathOptions,
    #[serde(default, rename = "netG")]
    pub net_g: NetOptions,
    #[serde(default)]
    pub train: TrainOptions,
    /// File these options were read from.
    #[serde(default)]
    pub opt_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// The document as written, for its key order.
    #[serde(skip)]
    file: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DatasetOptions {
    pub name: Option<String>,
    pub dataset_type: Option<String>,
    pub phase: Option<String>,
    #[serde(rename = "dataroot_H")]
    pub dataroot_h: Option<PathBuf>,
    #[serde(rename = "dataroot_L")]
    pub dataroot_l: Option<PathBuf>,
    pub scale: Option<u32>,
    pub n_channels: Option<u32>,
    #[serde(rename = "H_size")]
    pub h_size: Option<u32>,
    /// Scale factor used when synthesizing validation inputs.
    pub sf_validation: Option<u32>,
    pub kernel: Option<KernelOptions>,
    /// Noise standard deviation on the [0, 255] scale.
    pub noise_level: Option<f32>,
    pub dataloader_shuffle: Option<bool>,
    pub dataloader_num_workers: Option<usize>,
    pub dataloader_batch_size: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathOptions {
    pub root: Option<PathBuf>,
    #[serde(rename = "pretrained_netG")]
    pub pretrained_net_g: Option<PathBuf>,
    pub pretrained_lpips: Option<PathBuf>,
    pub task: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub options: Option<PathBuf>,
    pub models: Option<PathBuf>,
    pub images: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetOptions {
    pub net_type: Option<String>,
    pub n_iter: Option<usize>,
    pub h_nc: Option<usize>,
    pub in_nc: Option<usize>,
    pub out_nc: Option<usize>,
    pub nc: Option<Vec<usize>>,
    pub nb: Option<usize>,
    /// Gradient iterations of each data step.
    pub data_steps: Option<usize>,
    pub act_mode: Option<String>,
    pub upsample_mode: Option<String>,
    pub downsample_mode: Option<String>,
    pub scale: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainOptions {
    #[serde(rename = "G_lossfn_type")]
    pub g_lossfn_type: Option<String>,
    #[serde(rename = "G_optimizer_lr")]
    pub g_optimizer_lr: Option<f64>,
    #[serde(rename = "G_scheduler_milestones")]
    pub g_scheduler_milestones: Option<Vec<u64>>,
    pub manual_seed: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Drop `//` comments, leaving `//` inside string literals alone.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut end = line.len();
        let mut prev_slash = false;
        for (i, c) in line.char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '/' if prev_slash => {
                    end = i - 1;
                    break;
                }
                _ => {}
            }
            prev_slash = c == '/';
        }
        out.push_str(&line[..end]);
        out.push('\n');
    }
    out
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

impl Options {
    /// Parse options from JSON text and fill in derived values.
    pub fn from_json(text: &str, opt_path: &Path) -> Result<Self, OptionsError> {
        let parse_err = |source| OptionsError::Parse {
            path: opt_path.to_path_buf(),
            source,
        };
        let file: Value = serde_json::from_str(&strip_comments(text)).map_err(parse_err)?;
        let mut opts: Self = serde_json::from_value(file.clone()).map_err(parse_err)?;
        opts.file = file;
        opts.opt_path = Some(opt_path.to_path_buf());
        opts.resolve();
        Ok(opts)
    }

    /// Read and resolve an options file.
    pub fn parse(opt_path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(opt_path).map_err(|source| OptionsError::Read {
            path: opt_path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, opt_path)
    }

    fn resolve(&mut self) {
        for (phase, dataset) in &mut self.datasets {
            dataset.phase = Some(phase.clone());
            dataset.scale = Some(self.scale);
            dataset.n_channels = Some(self.n_channels);
            dataset.dataroot_h = dataset.dataroot_h.as_deref().map(expand_home);
            dataset.dataroot_l = dataset.dataroot_l.as_deref().map(expand_home);
        }

        let path = &mut self.path;
        let root = path
            .root
            .get_or_insert_with(|| PathBuf::from("results"))
            .clone();
        let task = path.task.get_or_insert_with(|| root.join(&self.task)).clone();
        path.log.get_or_insert_with(|| task.clone());
        path.options.get_or_insert_with(|| task.join("options"));
        path.models.get_or_insert_with(|| task.join("models"));
        path.images.get_or_insert_with(|| task.join("images"));

        self.net_g.scale = Some(self.scale);
    }

    /// The dataset evaluated on, the `test` phase.
    pub fn test_dataset(&self) -> Option<&DatasetOptions> {
        self.datasets.get("test")
    }

    /// Write a copy of the resolved options next to the run outputs.
    pub fn save(&self, stamp: &Timestamp) -> Result<PathBuf, OptionsError> {
        let dir = self
            .path
            .options
            .as_ref()
            .ok_or(OptionsError::Missing("path.options"))?;
        let stem = self
            .opt_path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map_or_else(|| "options".to_owned(), |s| s.to_string_lossy().into_owned());
        let dump_path = dir.join(format!("{stem}_{}.json", stamp.file_suffix()));

        let json = serde_json::to_string_pretty(&self.to_ordered_value()?)?;
        std::fs::create_dir_all(dir)
            .and_then(|()| std::fs::write(&dump_path, json))
            .map_err(|source| OptionsError::Write {
                path: dump_path.clone(),
                source,
            })?;
        Ok(dump_path)
    }

    /// The resolved options, keys in the order of the file they came from.
    /// Keys the file didn't have (derived paths and such) follow.
    fn to_ordered_value(&self) -> Result<Value, OptionsError> {
        Ok(in_file_order(&self.file, &serde_json::to_value(self)?))
    }

    /// Nested, indented rendering for logs.
    pub fn to_display_string(&self) -> Result<String, OptionsError> {
        let value = self.to_ordered_value()?;
        let mut out = String::new();
        if let Value::Object(map) = &value {
            render_map(map, 1, &mut out);
        }
        Ok(out)
    }

    /// Experiment name: date plus the hyper-parameters that distinguish runs.
    pub fn run_name(&self, stamp: &Timestamp) -> String {
        fn or_none<T: ToString>(v: Option<T>) -> String {
            v.map_or_else(|| "None".to_owned(), |v| v.to_string())
        }

        let batch = self
            .datasets
            .get("train")
            .and_then(|d| d.dataloader_batch_size);
        let milestones = self.train.g_scheduler_milestones.as_ref().map(|m| {
            let items: Vec<_> = m.iter().map(u64::to_string).collect();
            format!("[{}]", items.join(", "))
        });

        format!(
            "USRNet-{}-bs{}-loss_{}-lr_{}-G_scheduler_milestones_{}",
            stamp.run_id(),
            or_none(batch),
            or_none(self.train.g_lossfn_type.as_deref()),
            or_none(self.train.g_optimizer_lr.map(python_float)),
            or_none(milestones),
        )
    }
}

impl PathOptions {
    /// Output directories to create: every set path whose key isn't a pretrained weight file.
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let known = [
            &self.root,
            &self.task,
            &self.log,
            &self.options,
            &self.models,
            &self.images,
        ];
        let extra = self
            .extra
            .iter()
            .filter(|(key, _)| !key.contains("pretrained"))
            .filter_map(|(_, value)| value.as_str().map(PathBuf::from));

        known.into_iter().flatten().cloned().chain(extra).collect()
    }

    pub fn mkdirs(&self) -> std::io::Result<()> {
        for dir in self.output_dirs() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn in_file_order(file: &Value, resolved: &Value) -> Value {
    match (file, resolved) {
        (Value::Object(file), Value::Object(resolved)) => {
            let mut out = Map::new();
            for (key, file_value) in file {
                if let Some(value) = resolved.get(key) {
                    out.insert(key.clone(), in_file_order(file_value, value));
                }
            }
            for (key, value) in resolved {
                if !out.contains_key(key) {
                    out.insert(key.clone(), value.clone());
                }
            }
            Value::Object(out)
        }
        _ => resolved.clone(),
    }
}

/// Format a float like Python's `repr`: `0.0001`, `1e-05`, `2.0`.
pub fn python_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }

    let sci = format!("{v:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        let fixed = v.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_owned(),
        Value::Number(n) if n.is_f64() => n.as_f64().map_or_else(|| n.to_string(), python_float),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Array(items) => {
            let items: Vec<_> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

fn render_map(map: &Map<String, Value>, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent * 2);
    for (key, value) in map {
        if let Value::Object(inner) = value {
            let _ = writeln!(out, "{pad}{key}:[");
            render_map(inner, indent + 1, out);
            let _ = writeln!(out, "{pad}]");
        } else {
            let _ = writeln!(out, "{pad}{key}: {}", render_value(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Options, python_float, strip_comments};
    use crate::timestamp::Timestamp;
    use std::path::{Path, PathBuf};

    const SAMPLE: &str = r#"{
  // USRNet evaluation
  "task": "usrnet"
  , "scale": 4 // broadcast to datasets
  , "gpu_ids": [0]
  , "datasets": {
    "train": { "name": "train_dataset", "dataset_type": "usrnet", "dataloader_batch_size": 48 }
    , "test": { "name": "test_dataset", "dataset_type": "usrnet", "dataroot_H": "testsets/set5" }
  }
  , "path": { "root": "superresolution", "pretrained_netG": null }
  , "netG": { "net_type": "usrnet", "n_iter": 8, "nc": [64, 128, 256, 512] }
  , "train": {
    "G_lossfn_type": "l1"
    , "G_optimizer_lr": 1e-4
    , "G_scheduler_milestones": [100000, 200000]
    , "checkpoint_test": 5000
  }
  , "url": "http://example.com/a"
}"#;

    fn sample() -> Options {
        Options::from_json(SAMPLE, Path::new("options/train_usrnet.json")).expect("valid options")
    }

    #[test]
    fn comments_outside_strings_are_removed() {
        let text = "{\"a\": \"x//y\", // note\n// full line\n\"b\": 1}";
        let stripped = strip_comments(text);
        assert_eq!(stripped, "{\"a\": \"x//y\", \n\n\"b\": 1}\n");
    }

    #[test]
    fn derived_paths_follow_root_and_task() {
        let opts = sample();
        let task = PathBuf::from("superresolution/usrnet");
        assert_eq!(opts.path.task.as_ref(), Some(&task));
        assert_eq!(opts.path.log.as_ref(), Some(&task));
        assert_eq!(opts.path.images, Some(task.join("images")));
        assert_eq!(opts.path.options, Some(task.join("options")));
        assert!(
            !opts
                .path
                .output_dirs()
                .iter()
                .any(|p| p.to_string_lossy().contains("pretrained")),
            "pretrained paths are never created"
        );
    }

    #[test]
    fn scale_is_broadcast_to_datasets_and_network() {
        let opts = sample();
        let test = opts.test_dataset().expect("test dataset");
        assert_eq!(test.scale, Some(4));
        assert_eq!(test.phase.as_deref(), Some("test"));
        assert_eq!(opts.net_g.scale, Some(4));
    }

    #[test]
    fn missing_keys_read_as_unset() {
        let opts = Options::from_json("{}", Path::new("empty.json")).expect("empty options");
        assert_eq!(opts.scale, 4);
        assert_eq!(opts.train.manual_seed, None);
        assert!(opts.test_dataset().is_none());
        assert_eq!(opts.path.root, Some(PathBuf::from("results")));
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let opts = sample();
        let json = serde_json::to_value(&opts).expect("encode");
        assert_eq!(json["train"]["checkpoint_test"], 5000);
        assert_eq!(json["url"], "http://example.com/a");
    }

    #[test]
    fn run_name_lists_hyper_parameters() {
        let stamp = Timestamp::from_system_time(std::time::SystemTime::UNIX_EPOCH);
        assert_eq!(
            sample().run_name(&stamp),
            "USRNet-19700101-0000-bs48-loss_l1-lr_0.0001-G_scheduler_milestones_[100000, 200000]"
        );
    }

    #[test]
    fn floats_print_like_python() {
        assert_eq!(python_float(1e-5), "1e-05");
        assert_eq!(python_float(1e-4), "0.0001");
        assert_eq!(python_float(2.5e-7), "2.5e-07");
        assert_eq!(python_float(2.0), "2.0");
        assert_eq!(python_float(0.0), "0.0");
        assert_eq!(python_float(1e16), "1e+16");

        let text = SAMPLE.replace("1e-4", "1e-5");
        let opts = Options::from_json(&text, Path::new("a.json")).expect("valid options");
        let stamp = Timestamp::from_system_time(std::time::SystemTime::UNIX_EPOCH);
        assert!(opts.run_name(&stamp).contains("-lr_1e-05-"), "{}", opts.run_name(&stamp));
    }

    #[test]
    fn display_string_keeps_file_order() {
        let text = sample().to_display_string().expect("render");
        let pos = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("{needle} in {text}"));

        assert!(pos("  task: usrnet\n") < pos("  scale: 4\n"));
        assert!(pos("  scale: 4\n") < pos("  gpu_ids: [0]\n"));
        assert!(pos("    train:[\n") < pos("    test:[\n"), "datasets in file order");
        assert!(pos("    G_optimizer_lr: 0.0001\n") < pos("    checkpoint_test: 5000\n"));
        // Derived values follow what the file set.
        assert!(pos("    root: superresolution\n") < pos("    images: superresolution/usrnet/images\n"));
    }

    #[test]
    fn display_string_nests_groups() {
        let text = sample().to_display_string().expect("render");
        assert!(text.contains("  netG:[\n"), "{text}");
        assert!(text.contains("    net_type: usrnet\n"), "{text}");
        assert!(text.contains("  scale: 4\n"), "{text}");
    }

    #[test]
    fn saved_copy_lands_in_options_dir() {
        let mut opts = sample();
        let dir = std::env::temp_dir().join(format!("usr-options-{}", std::process::id()));
        opts.path.options = Some(dir.clone());
        let stamp = Timestamp::from_system_time(std::time::SystemTime::UNIX_EPOCH);

        let saved = opts.save(&stamp).expect("save");
        assert_eq!(saved, dir.join("train_usrnet_700101_000000.json"));
        let reread = Options::parse(&saved).expect("reparse");
        assert_eq!(reread.task, "usrnet");
    }
}
