use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    CANCER_STUDY_TAG, NUM_CASES_TAG, NUM_GENES_TAG, StudyId, TUMOR_TYPE_NAME_TAG, TUMOR_TYPE_TAG,
    VALUE_DELIMITER,
};
use crate::error::ImportError;
use crate::matrix::DataMatrix;
use crate::tools::NormalizationTool;

/// How one datatype is laid out in the staging area.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatatypeDescriptor {
    pub datatype: String,
    pub staging_filename: String,
    #[serde(default)]
    pub requires_metafile: bool,
    #[serde(default)]
    pub meta_filename: String,
    #[serde(default)]
    pub genetic_alteration_type: String,
    #[serde(default)]
    pub stable_id: String,
    #[serde(default)]
    pub show_profile_in_analysis_tab: bool,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub profile_description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaseListDescriptor {
    pub case_list_filename: String,
    pub stable_id: String,
    pub case_list_name: String,
    pub case_list_description: String,
    pub case_list_category: String,
}

/// Study-level descriptor written to the study's metadata file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancerStudyDescriptor {
    /// Display name of the tumor type, e.g. `Breast Invasive Carcinoma`.
    pub tumor_type_name: String,
    /// Study name; falls back to `tumor_type_name` when empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub citation: String,
    #[serde(default)]
    pub pmid: String,
    #[serde(default = "default_study_meta_filename")]
    pub meta_filename: String,
}

fn default_study_meta_filename() -> String {
    "meta_study.txt".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedFile {
    pub datatype: String,
    pub path: String,
    pub meta_path: Option<String>,
    pub rows: usize,
    pub staged_at: String,
}

/// Staging directory tree: `<root>/<study path>/<staging file>`.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: Utf8PathBuf,
    override_root: Option<Utf8PathBuf>,
}

impl StagingArea {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            override_root: None,
        }
    }

    pub fn with_override_root(mut self, override_root: Utf8PathBuf) -> Self {
        self.override_root = Some(override_root);
        self
    }

    pub fn from_paths(root: &Path, override_root: Option<&Path>) -> Result<Self, ImportError> {
        let staging = Self::new(utf8(root.to_path_buf())?);
        match override_root {
            Some(path) => Ok(staging.with_override_root(utf8(path.to_path_buf())?)),
            None => Ok(staging),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn study_dir(&self, study: &StudyId) -> Utf8PathBuf {
        self.root.join(study.study_path())
    }

    pub fn staging_file_path(&self, study: &StudyId, datatype: &DatatypeDescriptor) -> Utf8PathBuf {
        let filename = datatype
            .staging_filename
            .replace(CANCER_STUDY_TAG, &study.stable_identifier());
        self.study_dir(study).join(filename)
    }

    pub fn metadata_file_path(&self, study: &StudyId, datatype: &DatatypeDescriptor) -> Utf8PathBuf {
        self.study_dir(study).join(&datatype.meta_filename)
    }

    pub fn ensure_study_dir(&self, study: &StudyId) -> Result<Utf8PathBuf, ImportError> {
        let dir = self.study_dir(study);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        Ok(dir)
    }

    /// Writes `matrix` as the datatype's staging file, plus its metadata file
    /// when the datatype asks for one.
    pub fn write_staging_file(
        &self,
        study: &StudyId,
        datatype: &DatatypeDescriptor,
        matrix: &DataMatrix,
    ) -> Result<StagedFile, ImportError> {
        let path = self.staging_file_path(study, datatype);
        info!(path = %path, "writing staging file");
        let mut content = Vec::new();
        matrix
            .write_to(&mut content)
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&path, &content)?;
        self.finish_staging(study, datatype, Some(matrix), path, matrix.row_count())
    }

    pub(crate) fn finish_staging(
        &self,
        study: &StudyId,
        datatype: &DatatypeDescriptor,
        matrix: Option<&DataMatrix>,
        path: Utf8PathBuf,
        rows: usize,
    ) -> Result<StagedFile, ImportError> {
        let meta_path = if datatype.requires_metafile {
            Some(self.write_metadata_file(study, datatype, matrix)?.to_string())
        } else {
            None
        };
        Ok(StagedFile {
            datatype: datatype.datatype.clone(),
            path: path.to_string(),
            meta_path,
            rows,
            staged_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Writes the `key: value` metadata descriptor for a staging file.
    /// Gene and case counts are filled in only when `matrix` is given.
    pub fn write_metadata_file(
        &self,
        study: &StudyId,
        datatype: &DatatypeDescriptor,
        matrix: Option<&DataMatrix>,
    ) -> Result<Utf8PathBuf, ImportError> {
        let path = self.metadata_file_path(study, datatype);
        info!(path = %path, "writing metadata file");

        let stable_id = datatype
            .stable_id
            .replace(CANCER_STUDY_TAG, &study.stable_identifier());
        let mut description = datatype.profile_description.clone();
        if let Some(matrix) = matrix {
            description = description
                .replace(NUM_GENES_TAG, &matrix.row_count().to_string())
                .replace(NUM_CASES_TAG, &matrix.case_ids().len().to_string());
        }
        let description = description.replace(TUMOR_TYPE_TAG, study.tumor_type());

        let content = format!(
            "cancer_study_identifier: {study}\n\
             genetic_alteration_type: {}\n\
             stable_id: {stable_id}\n\
             show_profile_in_analysis_tab: {}\n\
             profile_description: {description}\n\
             profile_name: {}\n",
            datatype.genetic_alteration_type,
            datatype.show_profile_in_analysis_tab,
            datatype.profile_name,
        );
        write_bytes_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Writes the study's own metadata file. `<NUM_CASES>`, `<TUMOR_TYPE>`
    /// and `<TUMOR_TYPE_NAME>` are substituted in the description;
    /// `citation` and `pmid` lines appear only when set.
    pub fn write_cancer_study_metadata_file(
        &self,
        study: &StudyId,
        descriptor: &CancerStudyDescriptor,
        num_cases: usize,
    ) -> Result<Utf8PathBuf, ImportError> {
        let path = self.study_dir(study).join(&descriptor.meta_filename);
        info!(path = %path, "writing cancer study metadata file");

        let name = if descriptor.name.is_empty() {
            descriptor.tumor_type_name.as_str()
        } else {
            descriptor.name.as_str()
        };
        let name = name.replace(TUMOR_TYPE_NAME_TAG, &descriptor.tumor_type_name);
        let description = descriptor
            .description
            .replace(NUM_CASES_TAG, &num_cases.to_string())
            .replace(TUMOR_TYPE_NAME_TAG, &descriptor.tumor_type_name)
            .replace(TUMOR_TYPE_TAG, study.tumor_type());

        let mut content = format!(
            "type_of_cancer: {}\n\
             cancer_study_identifier: {study}\n\
             name: {name}\n\
             description: {description}\n",
            study.tumor_type(),
        );
        if !descriptor.citation.is_empty() {
            content.push_str(&format!("citation: {}\n", descriptor.citation));
        }
        if !descriptor.pmid.is_empty() {
            content.push_str(&format!("pmid: {}\n", descriptor.pmid));
        }
        write_bytes_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Derives the z-score staging file from the study's already staged
    /// copy-number and expression files.
    ///
    /// Returns `Ok(None)` when either input file has not been staged yet. A
    /// failed normalization removes any partial z-score file; metadata is
    /// written only after a successful run.
    pub fn write_zscores_staging_file<T: NormalizationTool>(
        &self,
        study: &StudyId,
        datatype: &DatatypeDescriptor,
        cna: &DatatypeDescriptor,
        expression: &DatatypeDescriptor,
        tool: &T,
    ) -> Result<Option<StagedFile>, ImportError> {
        let cna_path = self.staging_file_path(study, cna);
        if !cna_path.as_std_path().exists() {
            info!(path = %cna_path, "copy-number staging file not found, skipping z-scores");
            return Ok(None);
        }
        let expression_path = self.staging_file_path(study, expression);
        if !expression_path.as_std_path().exists() {
            info!(path = %expression_path, "expression staging file not found, skipping z-scores");
            return Ok(None);
        }

        let path = self.staging_file_path(study, datatype);
        info!(path = %path, cna = %cna_path, expression = %expression_path, "writing z-score staging file");
        if let Err(err) = tool.normalize(
            cna_path.as_std_path(),
            expression_path.as_std_path(),
            path.as_std_path(),
        ) {
            if path.as_std_path().exists() {
                if let Err(remove_err) = fs::remove_file(path.as_std_path()) {
                    warn!(path = %path, error = %remove_err, "failed to remove partial z-score file");
                }
            }
            return Err(err);
        }

        let rows = count_data_rows(&path)?;
        self.finish_staging(study, datatype, None, path, rows).map(Some)
    }

    pub fn write_case_list_file(
        &self,
        study: &StudyId,
        case_list: &CaseListDescriptor,
        case_ids: &[String],
    ) -> Result<Utf8PathBuf, ImportError> {
        let path = self
            .study_dir(study)
            .join("case_lists")
            .join(&case_list.case_list_filename);
        info!(path = %path, cases = case_ids.len(), "writing case list file");

        let stable_id = case_list
            .stable_id
            .replace(CANCER_STUDY_TAG, &study.stable_identifier());
        let description = case_list
            .case_list_description
            .replace(NUM_CASES_TAG, &case_ids.len().to_string());
        let ids = case_ids.join(&VALUE_DELIMITER.to_string());
        let content = format!(
            "cancer_study_identifier: {study}\n\
             stable_id: {stable_id}\n\
             case_list_name: {}\n\
             case_list_description: {description}\n\
             case_list_category: {}\n\
             case_list_ids: {ids}\n",
            case_list.case_list_name, case_list.case_list_category,
        );
        write_bytes_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Override file or directory for `filename` in the study's override
    /// area, when one exists.
    pub fn override_file(&self, study: &StudyId, filename: &str) -> Option<Utf8PathBuf> {
        let path = self
            .override_root
            .as_ref()?
            .join(study.study_path())
            .join(filename);
        path.as_std_path().exists().then_some(path)
    }

    /// Copies an override into the staging area. Returns `false` when there
    /// is nothing to apply.
    pub fn apply_override(
        &self,
        study: &StudyId,
        override_filename: &str,
        staging_filename: &str,
    ) -> Result<bool, ImportError> {
        let Some(source) = self.override_file(study, override_filename) else {
            return Ok(false);
        };
        let dest = self.study_dir(study).join(staging_filename);
        info!(source = %source, dest = %dest, "applying override");
        if source.as_std_path().is_file() {
            copy_file_atomic(&source, &dest)?;
        } else {
            copy_dir_recursive(&source, &dest)?;
        }
        Ok(true)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ImportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(())
}

fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), ImportError> {
    let parent = dest
        .parent()
        .ok_or_else(|| ImportError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".staging-file")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(())
}

fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), ImportError> {
    fs::create_dir_all(dest.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    for entry in walk_dir(source.as_std_path())? {
        let relative = entry
            .strip_prefix(source.as_std_path())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        let target = dest.as_std_path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| ImportError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| ImportError::Filesystem(err.to_string()))?;
            }
            fs::copy(&entry, &target).map_err(|err| ImportError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

pub(crate) fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| ImportError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| ImportError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

fn count_data_rows(path: &Utf8Path) -> Result<usize, ImportError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("open {path}: {err}")))?;
    let mut lines = 0usize;
    for line in BufReader::new(file).split(b'\n') {
        line.map_err(|err| ImportError::Filesystem(format!("read {path}: {err}")))?;
        lines += 1;
    }
    Ok(lines.saturating_sub(1))
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, ImportError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| ImportError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_paths_substitute_study() {
        let staging = StagingArea::new(Utf8PathBuf::from("/staging"));
        let study: StudyId = "brca/tcga".parse().unwrap();
        let datatype = DatatypeDescriptor {
            datatype: "mutation".to_string(),
            staging_filename: "data_mutations_<CANCER_STUDY>.txt".to_string(),
            requires_metafile: false,
            meta_filename: "meta_mutations.txt".to_string(),
            genetic_alteration_type: String::new(),
            stable_id: String::new(),
            show_profile_in_analysis_tab: false,
            profile_name: String::new(),
            profile_description: String::new(),
        };

        let path = staging.staging_file_path(&study, &datatype);
        assert_eq!(path, "/staging/brca/tcga/data_mutations_brca_tcga.txt");
        let meta = staging.metadata_file_path(&study, &datatype);
        assert!(meta.ends_with("brca/tcga/meta_mutations.txt"));
    }
}
