use std::fs::{self, File};
use std::io::{Read, Write};

use uuid::Uuid;
use webnovel_fetch::epub::{self, StagingDir, finalize, reopen};
use webnovel_fetch::{ArchiveItem, ChapterArchiveItem, ChapterIndex, Error, Metadata, Webnovel};
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

fn stage_chapter(staging: &std::path::Path, band: u32, position: u32, title: &str) -> ChapterArchiveItem {
    stage_chapter_with(staging, band, position, title, &format!("<p>{}</p>", title))
}

fn stage_chapter_with(
    staging: &std::path::Path,
    band: u32,
    position: u32,
    title: &str,
    body: &str,
) -> ChapterArchiveItem {
    let id = Uuid::new_v4();
    let path = format!("Text/{}.xhtml", id);
    fs::write(
        staging.join("OEBPS").join(&path),
        epub::xhtml::chapter_document(title, body),
    )
    .unwrap();
    ChapterArchiveItem {
        item: ArchiveItem {
            id,
            path,
            media_type: "application/xhtml+xml".into(),
        },
        index: ChapterIndex::new(band, position),
        title: title.into(),
        url: format!("https://novelbin.me/b/novel/chapter-{}-{}", band, position),
    }
}

fn novel() -> Webnovel {
    Webnovel::new(Metadata::new(
        "The Novel".into(),
        "Some Author".into(),
        "https://novelbin.me/b/novel".into(),
    ))
}

#[test]
fn finalize_then_reopen_gives_an_equal_webnovel() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingDir::create(dir.path().join("staging")).unwrap();

    let mut webnovel = novel();
    let cover_path = "Images/cover.webp".to_string();
    fs::write(staging.path().join("OEBPS").join(&cover_path), b"RIFF").unwrap();
    webnovel.metadata.cover_image = Some(ArchiveItem {
        id: Uuid::new_v4(),
        path: cover_path,
        media_type: "image/webp".into(),
    });
    webnovel.metadata.source_urls.push("https://noveloon.com/novel/the-novel".into());
    webnovel.chapters = vec![
        stage_chapter(staging.path(), 1, 0, "Later"),
        stage_chapter(staging.path(), 0, 0, "First"),
        stage_chapter(staging.path(), 0, 1, "Second"),
    ];

    let out = dir.path().join("out").join("the-novel.epub");
    finalize(&webnovel, staging.path(), &out).unwrap();

    let extracted = dir.path().join("extracted");
    let reopened = reopen(&out, &extracted).unwrap();

    webnovel.normalize();
    assert_eq!(reopened, webnovel);
    let titles: Vec<_> = reopened.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["First", "Second", "Later"]);
    assert!(extracted.join("OEBPS").join(&reopened.chapters[0].item.path).is_file());
}

#[test]
fn round_trip_with_zero_chapters_and_no_cover() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingDir::create(dir.path().join("staging")).unwrap();
    let webnovel = novel();

    let out = dir.path().join("empty.epub");
    finalize(&webnovel, staging.path(), &out).unwrap();
    let reopened = reopen(&out, &dir.path().join("extracted")).unwrap();

    assert_eq!(reopened, webnovel);
    assert!(reopened.chapters.is_empty());
    assert!(reopened.metadata.cover_image.is_none());
}

#[test]
fn package_starts_with_stored_mimetype_and_carries_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingDir::create(dir.path().join("staging")).unwrap();
    let mut webnovel = novel();
    webnovel.chapters = vec![stage_chapter(staging.path(), 0, 0, "Only")];

    let out = dir.path().join("book.epub");
    finalize(&webnovel, staging.path(), &out).unwrap();

    let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
    assert_eq!(archive.by_index(0).unwrap().name(), "mimetype");
    for name in [
        "META-INF/container.xml",
        "OEBPS/content.opf",
        "OEBPS/toc.ncx",
        "OEBPS/toc.xhtml",
        "OEBPS/wte.json",
    ] {
        assert!(archive.by_name(name).is_ok(), "{} missing", name);
    }

    let mut opf = String::new();
    archive.by_name("OEBPS/content.opf").unwrap().read_to_string(&mut opf).unwrap();
    assert!(opf.contains(r#"id="wte-snapshot""#));
    assert!(opf.contains(&webnovel.chapters[0].item.path));
}

#[test]
fn finalize_refuses_chapters_missing_from_staging() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingDir::create(dir.path().join("staging")).unwrap();
    let mut webnovel = novel();
    let mut chapter = stage_chapter(staging.path(), 0, 0, "Ghost");
    chapter.item.path = "Text/never-written.xhtml".into();
    webnovel.chapters = vec![chapter];

    let result = finalize(&webnovel, staging.path(), &dir.path().join("x.epub"));
    assert!(matches!(result, Err(Error::ArchiveWrite { .. })));
}

fn stage_image(staging: &std::path::Path, name: &str) -> ArchiveItem {
    let path = format!("Images/{}.webp", name);
    fs::write(staging.join("OEBPS").join(&path), b"RIFF").unwrap();
    ArchiveItem {
        id: Uuid::new_v4(),
        path,
        media_type: "image/webp".into(),
    }
}

#[test]
fn package_holds_exactly_what_the_manifest_lists() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingDir::create(dir.path().join("staging")).unwrap();

    let kept_image = stage_image(staging.path(), "kept");
    let twin_image = stage_image(staging.path(), "twin");
    stage_image(staging.path(), "stray");

    let original = stage_chapter_with(
        staging.path(),
        0,
        0,
        "Original",
        &format!(r#"<p>a</p><img src="../{}"/>"#, kept_image.path),
    );
    let mut twin = stage_chapter_with(
        staging.path(),
        0,
        1,
        "Twin",
        &format!(r#"<p>a</p><img src="../{}"/>"#, twin_image.path),
    );
    twin.url = original.url.clone();

    let mut webnovel = novel();
    webnovel.chapters = vec![original.clone(), twin.clone()];
    webnovel.items = vec![kept_image.clone(), twin_image.clone()];

    let out = dir.path().join("book.epub");
    finalize(&webnovel, staging.path(), &out).unwrap();

    let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
    let mut packed: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("OEBPS/Text/") || name.starts_with("OEBPS/Images/"))
        .filter(|name| !name.ends_with('/'))
        .map(|name| name.trim_start_matches("OEBPS/").to_string())
        .collect();
    packed.sort();
    let mut expected = vec![original.item.path.clone(), kept_image.path.clone()];
    expected.sort();
    assert_eq!(packed, expected);

    let mut opf = String::new();
    archive.by_name("OEBPS/content.opf").unwrap().read_to_string(&mut opf).unwrap();
    for path in &expected {
        assert!(opf.contains(&format!(r#"href="{}""#, path)), "{} not in manifest", path);
    }
    assert!(!opf.contains(&twin.item.path));
    assert!(!opf.contains(&twin_image.path));

    let reopened = reopen(&out, &dir.path().join("extracted")).unwrap();
    assert_eq!(reopened.chapters, vec![original]);
    assert_eq!(reopened.items, vec![kept_image]);
}

fn zip_with(path: &std::path::Path, entries: &[(&str, &str)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn reopen_rejects_foreign_and_broken_archives() {
    let dir = tempfile::tempdir().unwrap();

    let not_zip = dir.path().join("not-zip.epub");
    fs::write(&not_zip, "plain text").unwrap();
    assert!(matches!(
        reopen(&not_zip, &dir.path().join("a")),
        Err(Error::InvalidArchive { .. })
    ));

    let foreign = dir.path().join("foreign.epub");
    zip_with(&foreign, &[("mimetype", "application/epub+zip"), ("OEBPS/content.opf", "<package/>")]);
    match reopen(&foreign, &dir.path().join("b")) {
        Err(Error::InvalidArchive { path, .. }) => assert_eq!(path, foreign),
        other => panic!("expected InvalidArchive, got {:?}", other),
    }

    let malformed = dir.path().join("malformed.epub");
    zip_with(&malformed, &[("OEBPS/wte.json", r#"{"metadata": {"title": 3}}"#)]);
    assert!(matches!(
        reopen(&malformed, &dir.path().join("c")),
        Err(Error::InvalidArchive { .. })
    ));

    assert!(matches!(
        reopen(&dir.path().join("missing.epub"), &dir.path().join("d")),
        Err(Error::InvalidArchive { .. })
    ));
}

#[test]
fn reopen_rejects_snapshots_pointing_at_missing_chapters() {
    let dir = tempfile::tempdir().unwrap();
    let mut webnovel = novel();
    webnovel.chapters = vec![ChapterArchiveItem {
        item: ArchiveItem {
            id: Uuid::new_v4(),
            path: "Text/absent.xhtml".into(),
            media_type: "application/xhtml+xml".into(),
        },
        index: ChapterIndex::new(0, 0),
        title: "Absent".into(),
        url: "https://novelbin.me/b/novel/chapter-1".into(),
    }];

    let broken = dir.path().join("broken.epub");
    let snapshot = serde_json::to_string(&webnovel).unwrap();
    zip_with(&broken, &[("OEBPS/wte.json", snapshot.as_str())]);
    assert!(matches!(
        reopen(&broken, &dir.path().join("e")),
        Err(Error::InvalidArchive { .. })
    ));
}
