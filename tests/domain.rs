use std::path::Path;

use assert_matches::assert_matches;

use staging_importer::domain::{DataFilename, FileLocation, GenomeBuild, StudyId};
use staging_importer::error::ImportError;

#[test]
fn build_tokens() {
    assert_eq!(GenomeBuild::from_token("36"), GenomeBuild::Hg18);
    assert_eq!(GenomeBuild::from_token("36.1"), GenomeBuild::Hg18);
    assert_eq!(GenomeBuild::from_token("HG18"), GenomeBuild::Hg18);
    assert_eq!(GenomeBuild::from_token("37"), GenomeBuild::Hg19);
    assert_eq!(GenomeBuild::from_token("hg19"), GenomeBuild::Hg19);
    assert_eq!(
        GenomeBuild::from_token("GRCh38"),
        GenomeBuild::Unknown("GRCh38".to_string())
    );
    assert!(GenomeBuild::from_token("hg18").needs_liftover());
    assert!(!GenomeBuild::from_token("hg18x").needs_liftover());
    assert!(!GenomeBuild::from_token("").needs_liftover());
}

#[test]
fn file_locations() {
    let plain: FileLocation = "/data/run.tar.gz".parse().unwrap();
    assert_eq!(plain.as_path(), Path::new("/data/run.tar.gz"));

    let url: FileLocation = "file:///data/run.tar.gz".parse().unwrap();
    assert_eq!(url, plain);
    let localhost: FileLocation = "file://localhost/data/run.tar.gz".parse().unwrap();
    assert_eq!(localhost, plain);
    let short: FileLocation = "file:/data/run.tar.gz".parse().unwrap();
    assert_eq!(short, plain);
    assert_eq!(plain.to_url(), "file:///data/run.tar.gz");

    assert_matches!(
        "file:relative/path".parse::<FileLocation>(),
        Err(ImportError::InvalidLocation(_))
    );
    assert_matches!(
        "  ".parse::<FileLocation>(),
        Err(ImportError::InvalidLocation(_))
    );
}

#[test]
fn tumor_type_tag_substitution() {
    let name = DataFilename::new("<TUMOR_TYPE>.maf.annotated");
    assert_eq!(name.resolve(Some("BRCA")), "BRCA.maf.annotated");
    assert_eq!(name.resolve(None), "<TUMOR_TYPE>.maf.annotated");

    let fixed = DataFilename::new("all_thresholded.by_genes.txt");
    assert_eq!(fixed.resolve(Some("BRCA")), "all_thresholded.by_genes.txt");
}

#[test]
fn study_ids() {
    let study: StudyId = "BRCA/TCGA".parse().unwrap();
    assert_eq!(study.as_str(), "brca/tcga");
    assert_eq!(study.stable_identifier(), "brca_tcga");
    assert_eq!(study.tumor_type(), "brca");
    assert_eq!(study.to_string(), "brca_tcga");

    assert_matches!("brca".parse::<StudyId>(), Err(ImportError::InvalidStudyId(_)));
    assert_matches!(
        "brca//tcga".parse::<StudyId>(),
        Err(ImportError::InvalidStudyId(_))
    );
    assert_matches!(
        "brca/tc ga".parse::<StudyId>(),
        Err(ImportError::InvalidStudyId(_))
    );
}
