use std::fs;

use anyhow::Result;
use imclip::catalog::{Catalog, CatalogError, suffix_regex};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn images() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    for name in ["b.jpg", "a.PNG", "sub/c.jpeg", "sub/deep/d.png", "notes.txt", "e.gif", ".index/x.jpg"] {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }
    fs::create_dir_all(root.join("empty.jpg")).unwrap();
    tmp
}

#[rstest]
fn scan_sorted_relative_posix(images: TempDir) -> Result<()> {
    let catalog = Catalog::scan(images.path(), "jpg,jpeg,png")?;
    assert_eq!(catalog.entries(), ["a.PNG", "b.jpg", "sub/c.jpeg", "sub/deep/d.png"]);
    assert_eq!(catalog.len(), 4);
    assert_eq!(catalog.path_of(2), images.path().join("sub/c.jpeg"));
    Ok(())
}

#[rstest]
#[case("gif", &["e.gif"])]
#[case(".TXT, .gif", &["e.gif", "notes.txt"])]
#[case("png", &["a.PNG", "sub/deep/d.png"])]
fn scan_with_suffix(images: TempDir, #[case] suffix: &str, #[case] expected: &[&str]) -> Result<()> {
    let catalog = Catalog::scan(images.path(), suffix)?;
    assert_eq!(catalog.entries(), expected);
    Ok(())
}

#[rstest]
fn scan_is_deterministic(images: TempDir) -> Result<()> {
    let a = Catalog::scan(images.path(), "jpg,jpeg,png")?;
    let b = Catalog::scan(images.path(), "jpg,jpeg,png")?;
    assert_eq!(a.entries(), b.entries());
    Ok(())
}

#[rstest]
fn nested_index_dir_is_scanned() -> Result<()> {
    let tmp = TempDir::new()?;
    fs::create_dir_all(tmp.path().join("sub/.index"))?;
    fs::write(tmp.path().join("sub/.index/a.jpg"), b"")?;
    let catalog = Catalog::scan(tmp.path(), "jpg")?;
    assert_eq!(catalog.entries(), ["sub/.index/a.jpg"]);
    Ok(())
}

#[rstest]
fn empty_directory() -> Result<()> {
    let tmp = TempDir::new()?;
    let catalog = Catalog::scan(tmp.path(), "jpg")?;
    assert!(catalog.is_empty());
    Ok(())
}

#[rstest]
fn missing_directory_is_not_found() -> Result<()> {
    let tmp = TempDir::new()?;
    let err = Catalog::scan(tmp.path().join("missing"), "jpg").unwrap_err();
    assert!(matches!(err.downcast_ref::<CatalogError>(), Some(CatalogError::NotFound(_))));
    Ok(())
}

#[rstest]
fn file_is_not_a_directory() -> Result<()> {
    let tmp = TempDir::new()?;
    let file = tmp.path().join("a.jpg");
    fs::write(&file, b"")?;
    let err = Catalog::scan(&file, "jpg").unwrap_err();
    assert!(matches!(err.downcast_ref::<CatalogError>(), Some(CatalogError::NotADirectory(_))));
    Ok(())
}

#[rstest]
#[case("jpg", "JPG", true)]
#[case("jpg,png", "png", true)]
#[case("jpg", "jpeg", false)]
#[case("jpg", "xjpg", false)]
#[case("c++", "c++", true)]
fn suffix_matching(#[case] suffix: &str, #[case] ext: &str, #[case] expected: bool) -> Result<()> {
    assert_eq!(suffix_regex(suffix)?.is_match(ext), expected);
    Ok(())
}

#[rstest]
#[case("")]
#[case(" , ,")]
fn invalid_suffix(#[case] suffix: &str) {
    let err = suffix_regex(suffix).unwrap_err();
    assert!(matches!(err.downcast_ref::<CatalogError>(), Some(CatalogError::InvalidSuffix(_))));
}
