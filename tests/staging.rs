use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use staging_importer::domain::StudyId;
use staging_importer::error::ImportError;
use staging_importer::matrix::DataMatrix;
use staging_importer::pipeline::PipelineState;
use staging_importer::staging::{
    CancerStudyDescriptor, CaseListDescriptor, DatatypeDescriptor, StagingArea,
};
use staging_importer::tools::NormalizationTool;

#[derive(Default)]
struct MockNormalizer {
    calls: Mutex<usize>,
    fail: bool,
}

impl NormalizationTool for MockNormalizer {
    fn normalize(&self, cna: &Path, expression: &Path, output: &Path) -> Result<(), ImportError> {
        *self.calls.lock().unwrap() += 1;
        assert!(cna.ends_with("data_CNA.txt"));
        assert!(expression.ends_with("data_expression.txt"));
        if self.fail {
            fs::write(output, "Hugo_Symbol\tS1\nTP53\t").unwrap();
            return Err(ImportError::ToolFailed {
                stage: PipelineState::Normalized,
                message: "no overlapping samples".to_string(),
            });
        }
        fs::write(output, "Hugo_Symbol\tS1\tS2\nTP53\t-1.2\t0.4\nMYC\t2.1\t0.0\n").unwrap();
        Ok(())
    }
}

fn zscore_datatypes() -> (DatatypeDescriptor, DatatypeDescriptor, DatatypeDescriptor) {
    let zscores = DatatypeDescriptor {
        datatype: "mrna-zscores".to_string(),
        staging_filename: "data_mRNA_median_Zscores.txt".to_string(),
        meta_filename: "meta_mRNA_median_Zscores.txt".to_string(),
        genetic_alteration_type: "MRNA_EXPRESSION".to_string(),
        stable_id: "<CANCER_STUDY>_mrna_median_Zscores".to_string(),
        profile_description: "mRNA z-scores for <NUM_GENES> genes".to_string(),
        ..cna_datatype()
    };
    let expression = DatatypeDescriptor {
        datatype: "expression".to_string(),
        staging_filename: "data_expression.txt".to_string(),
        requires_metafile: false,
        ..cna_datatype()
    };
    (zscores, cna_datatype(), expression)
}

fn staging_area(dir: &tempfile::TempDir) -> StagingArea {
    StagingArea::new(Utf8PathBuf::from_path_buf(dir.path().join("staging")).unwrap())
        .with_override_root(Utf8PathBuf::from_path_buf(dir.path().join("overrides")).unwrap())
}

fn cna_datatype() -> DatatypeDescriptor {
    DatatypeDescriptor {
        datatype: "cna".to_string(),
        staging_filename: "data_CNA.txt".to_string(),
        requires_metafile: true,
        meta_filename: "meta_CNA.txt".to_string(),
        genetic_alteration_type: "COPY_NUMBER_ALTERATION".to_string(),
        stable_id: "<CANCER_STUDY>_gistic".to_string(),
        show_profile_in_analysis_tab: true,
        profile_name: "Putative copy-number alterations".to_string(),
        profile_description: "<NUM_GENES> genes in <NUM_CASES> <TUMOR_TYPE> cases".to_string(),
    }
}

fn cna_matrix() -> DataMatrix {
    DataMatrix::new(
        vec!["Hugo_Symbol".to_string(), "S1".to_string(), "S2".to_string()],
        vec![
            vec!["TP53".to_string(), "-2".to_string(), "0".to_string()],
            vec!["MYC".to_string(), "2".to_string(), "1".to_string()],
            vec!["PTEN".to_string(), "".to_string(), "-1".to_string()],
        ],
    )
}

#[test]
fn writes_staging_and_metadata_files() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();

    let staged = staging
        .write_staging_file(&study, &cna_datatype(), &cna_matrix())
        .unwrap();

    assert_eq!(staged.rows, 3);
    assert!(staged.path.ends_with("brca/tcga/data_CNA.txt"));
    assert_eq!(
        fs::read_to_string(&staged.path).unwrap(),
        "Hugo_Symbol\tS1\tS2\nTP53\t-2\t0\nMYC\t2\t1\nPTEN\t\t-1\n"
    );

    let meta = fs::read_to_string(staged.meta_path.unwrap()).unwrap();
    assert!(meta.contains("cancer_study_identifier: brca_tcga\n"));
    assert!(meta.contains("genetic_alteration_type: COPY_NUMBER_ALTERATION\n"));
    assert!(meta.contains("stable_id: brca_tcga_gistic\n"));
    assert!(meta.contains("show_profile_in_analysis_tab: true\n"));
    assert!(meta.contains("profile_description: 3 genes in 2 brca cases\n"));
}

#[test]
fn no_metadata_file_unless_required() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let datatype = DatatypeDescriptor {
        requires_metafile: false,
        ..cna_datatype()
    };

    let staged = staging
        .write_staging_file(&study, &datatype, &cna_matrix())
        .unwrap();
    assert!(staged.meta_path.is_none());
    assert!(!staging.metadata_file_path(&study, &datatype).exists());
}

#[test]
fn writes_case_list() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let case_list = CaseListDescriptor {
        case_list_filename: "cases_cna.txt".to_string(),
        stable_id: "<CANCER_STUDY>_cna".to_string(),
        case_list_name: "Tumors with CNA data".to_string(),
        case_list_description: "All tumors with CNA data (<NUM_CASES> samples)".to_string(),
        case_list_category: "all_cases_with_cna_data".to_string(),
    };
    let ids = vec!["S1".to_string(), "S2".to_string()];

    let path = staging.write_case_list_file(&study, &case_list, &ids).unwrap();
    assert!(path.ends_with("brca/tcga/case_lists/cases_cna.txt"));
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("stable_id: brca_tcga_cna\n"));
    assert!(content.contains("(2 samples)"));
    assert!(content.contains("case_list_ids: S1\tS2\n"));
}

#[test]
fn override_file_replaces_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();

    assert!(!staging.apply_override(&study, "data_CNA.txt", "data_CNA.txt").unwrap());

    let override_dir = dir.path().join("overrides/brca/tcga");
    fs::create_dir_all(&override_dir).unwrap();
    fs::write(override_dir.join("data_CNA.txt"), "curated\n").unwrap();
    fs::create_dir_all(override_dir.join("case_lists")).unwrap();
    fs::write(override_dir.join("case_lists/cases_all.txt"), "ids\n").unwrap();

    assert!(staging.apply_override(&study, "data_CNA.txt", "data_CNA.txt").unwrap());
    let staged = staging.study_dir(&study);
    assert_eq!(
        fs::read_to_string(staged.join("data_CNA.txt")).unwrap(),
        "curated\n"
    );

    assert!(staging.apply_override(&study, "case_lists", "case_lists").unwrap());
    assert_eq!(
        fs::read_to_string(staged.join("case_lists/cases_all.txt")).unwrap(),
        "ids\n"
    );
}

#[test]
fn writes_cancer_study_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let descriptor = CancerStudyDescriptor {
        tumor_type_name: "Breast Invasive Carcinoma".to_string(),
        name: "<TUMOR_TYPE_NAME> (TCGA)".to_string(),
        description: "<NUM_CASES> <TUMOR_TYPE> samples of <TUMOR_TYPE_NAME>".to_string(),
        citation: String::new(),
        pmid: "23000897".to_string(),
        meta_filename: "meta_study.txt".to_string(),
    };

    let path = staging
        .write_cancer_study_metadata_file(&study, &descriptor, 825)
        .unwrap();
    assert!(path.ends_with("brca/tcga/meta_study.txt"));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "type_of_cancer: brca\n\
         cancer_study_identifier: brca_tcga\n\
         name: Breast Invasive Carcinoma (TCGA)\n\
         description: 825 brca samples of Breast Invasive Carcinoma\n\
         pmid: 23000897\n"
    );

    let unnamed = CancerStudyDescriptor {
        name: String::new(),
        pmid: String::new(),
        ..descriptor
    };
    let path = staging
        .write_cancer_study_metadata_file(&study, &unnamed, 0)
        .unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("name: Breast Invasive Carcinoma\n"));
    assert!(!content.contains("pmid"));
    assert!(!content.contains("citation"));
}

#[test]
fn zscores_wait_for_both_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let (zscores, cna, expression) = zscore_datatypes();
    let tool = MockNormalizer::default();

    staging.write_staging_file(&study, &cna, &cna_matrix()).unwrap();
    let staged = staging
        .write_zscores_staging_file(&study, &zscores, &cna, &expression, &tool)
        .unwrap();

    assert!(staged.is_none());
    assert_eq!(*tool.calls.lock().unwrap(), 0);
    assert!(!staging.staging_file_path(&study, &zscores).exists());
}

#[test]
fn zscores_are_staged_with_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let (zscores, cna, expression) = zscore_datatypes();
    staging.write_staging_file(&study, &cna, &cna_matrix()).unwrap();
    staging
        .write_staging_file(&study, &expression, &cna_matrix())
        .unwrap();
    let tool = MockNormalizer::default();

    let staged = staging
        .write_zscores_staging_file(&study, &zscores, &cna, &expression, &tool)
        .unwrap()
        .unwrap();

    assert_eq!(staged.rows, 2);
    assert!(staged.path.ends_with("data_mRNA_median_Zscores.txt"));
    let meta = fs::read_to_string(staged.meta_path.unwrap()).unwrap();
    assert!(meta.contains("stable_id: brca_tcga_mrna_median_Zscores\n"));
    // No matrix is available for the derived file, so counts stay unfilled.
    assert!(meta.contains("profile_description: mRNA z-scores for <NUM_GENES> genes\n"));
}

#[test]
fn failed_normalization_removes_partial_zscores() {
    let dir = tempfile::tempdir().unwrap();
    let staging = staging_area(&dir);
    let study: StudyId = "brca/tcga".parse().unwrap();
    let (zscores, cna, expression) = zscore_datatypes();
    staging.write_staging_file(&study, &cna, &cna_matrix()).unwrap();
    staging
        .write_staging_file(&study, &expression, &cna_matrix())
        .unwrap();
    let tool = MockNormalizer {
        fail: true,
        ..MockNormalizer::default()
    };

    let err = staging
        .write_zscores_staging_file(&study, &zscores, &cna, &expression, &tool)
        .unwrap_err();

    assert_matches!(
        err,
        ImportError::ToolFailed {
            stage: PipelineState::Normalized,
            ..
        }
    );
    assert!(!staging.staging_file_path(&study, &zscores).exists());
    assert!(!staging.metadata_file_path(&study, &zscores).exists());
}
