//! Integration tests for the image graph.
//!
//! Covers the catalog lifecycle (init, create, register, delete,
//! re-register), concurrent registration, and mounting an image chain.
//! Mount contents are checked through a copying driver; the `OverlayFS`
//! test needs root and is ignored by default.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use lamina_common::error::{ErrorKind, LaminaError, Result};
use lamina_common::types::{ImageId, validate_id};
use lamina_image::{Graph, Image, MountAssembler, MountDriver};

const CONTENT: &[u8] = b"Hello world!\n";
const FILES: [&str; 3] = [
    "/etc/postgres/postgres.conf",
    "/etc/passwd",
    "/var/log/postgres/postgres.conf",
];

// ── Helpers ──────────────────────────────────────────────────────────

fn fake_tar() -> Vec<u8> {
    tar_of(&FILES.map(|name| (name, CONTENT)))
}

fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        builder.append(&header, *data).expect("append entry");
    }
    builder.into_inner().expect("finish tar")
}

fn temp_graph() -> (tempfile::TempDir, Graph) {
    let dir = tempfile::tempdir().expect("tempdir");
    let graph = Graph::new(dir.path().join("graph")).expect("new graph");
    (dir, graph)
}

fn assert_n_images(graph: &Graph, n: usize) {
    let images = graph.all().expect("all");
    assert_eq!(images.len(), n, "expected {n} images, found {}", images.len());
}

fn mount_dirs(dir: &Path) -> (PathBuf, PathBuf) {
    let rootfs = dir.join("rootfs");
    let rw = dir.join("rw");
    fs::create_dir_all(&rootfs).expect("mkdir rootfs");
    fs::create_dir_all(&rw).expect("mkdir rw");
    (rootfs, rw)
}

/// Copies layers base-first into the target; stands in for a union mount.
#[derive(Default)]
struct CopyDriver {
    mounted: Mutex<HashSet<PathBuf>>,
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else {
            let _ = fs::copy(entry.path(), to)?;
        }
    }
    Ok(())
}

impl MountDriver for CopyDriver {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn compose(&self, layers: &[PathBuf], rw: &Path, target: &Path) -> Result<()> {
        let mut mounted = self.mounted.lock().unwrap();
        if mounted.contains(target) {
            return Err(LaminaError::mount(target, "already mounted"));
        }
        for dir in layers.iter().map(PathBuf::as_path).chain([rw]) {
            copy_tree(dir, target).map_err(|e| LaminaError::mount(target, e))?;
        }
        let _ = mounted.insert(target.to_path_buf());
        Ok(())
    }

    fn teardown(&self, target: &Path) -> Result<()> {
        if self.mounted.lock().unwrap().remove(target) {
            Ok(())
        } else {
            Err(LaminaError::mount(target, "not mounted"))
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

#[test]
fn init_creates_root_and_lists_nothing() {
    let (_dir, graph) = temp_graph();
    assert!(graph.root().is_dir());
    assert_n_images(&graph, 0);
}

#[test]
fn init_rejects_file_as_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("graph");
    fs::write(&root, b"").expect("write");
    let err = Graph::new(&root).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn graph_create() {
    let (_dir, graph) = temp_graph();
    let image = graph
        .create(fake_tar().as_slice(), None, "Testing")
        .expect("create");

    validate_id(image.id.as_str()).expect("valid id");
    assert_eq!(image.comment, "Testing");
    assert!(image.parent.is_none());
    assert!(image.created.is_some());

    let images = graph.all().expect("all");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, image.id);
}

#[test]
fn register_with_caller_chosen_id() {
    let (_dir, graph) = temp_graph();
    let image = Image::with_id(ImageId::generate(), None, "testing");

    let _ = graph
        .register(fake_tar().as_slice(), &image)
        .expect("register");

    assert_n_images(&graph, 1);
    let stored = graph.get(&image.id).expect("get");
    assert_eq!(stored.id, image.id);
    assert_eq!(stored.comment, image.comment);
}

#[test]
fn get_unknown_id_is_not_found() {
    let (_dir, graph) = temp_graph();
    let err = graph.get(&ImageId::generate()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn same_comment_yields_distinct_images() {
    let (_dir, graph) = temp_graph();
    let archive = fake_tar();
    let first = graph.create(archive.as_slice(), None, "Testing").expect("create");
    let second = graph.create(archive.as_slice(), None, "Testing").expect("create");

    assert_ne!(first.id, second.id);
    let ids: HashSet<_> = graph.all().expect("all").into_iter().map(|i| i.id).collect();
    assert_eq!(ids, HashSet::from([first.id, second.id]));
}

#[test]
fn delete() {
    let (_dir, graph) = temp_graph();
    let archive = fake_tar();
    assert_n_images(&graph, 0);

    let image = graph.create(archive.as_slice(), None, "Bla bla").expect("create");
    assert_n_images(&graph, 1);
    graph.delete(&image.id).expect("delete");
    assert_n_images(&graph, 0);

    // Two creates with the same comment, one delete.
    let img1 = graph.create(archive.as_slice(), None, "Testing").expect("create");
    let _ = graph.create(archive.as_slice(), None, "Testing").expect("create");
    assert_n_images(&graph, 2);
    graph.delete(&img1.id).expect("delete");
    assert_n_images(&graph, 1);

    // Unknown identifiers: malformed, and well-formed but absent.
    assert!(ImageId::parse("Not_foo").is_err());
    let err = graph.delete(&ImageId::generate()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_n_images(&graph, 1);

    // Delete, re-register, delete again.
    let _ = graph.register(archive.as_slice(), &img1).expect("re-register");
    assert_eq!(graph.get(&img1.id).expect("get").comment, "Testing");
    assert_n_images(&graph, 2);
    graph.delete(&img1.id).expect("delete again");
    assert_n_images(&graph, 1);
}

#[test]
fn deleted_image_is_gone_from_disk() {
    let (_dir, graph) = temp_graph();
    let image = graph.create(fake_tar().as_slice(), None, "gone").expect("create");
    let location = graph.store().image_dir(&image.id);
    assert!(location.is_dir());

    graph.delete(&image.id).expect("delete");
    assert!(!location.exists());
    assert!(!graph.exists(&image.id));
    assert_eq!(graph.delete(&image.id).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn failed_register_is_invisible() {
    let (_dir, graph) = temp_graph();
    let image = Image::new(None, "broken");
    let err = graph
        .register(tar_of(&[("../../escape", CONTENT)]).as_slice(), &image)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Archive);
    assert_n_images(&graph, 0);
    assert!(graph.get(&image.id).is_err());
}

#[test]
fn export_layer_reproduces_content() {
    let (_dir, graph) = temp_graph();
    let image = graph.create(fake_tar().as_slice(), None, "export").expect("create");

    let exported = graph.export_layer(&image.id, Vec::new()).expect("export");
    let copy = graph
        .create(exported.as_slice(), Some(&image.id), "copy")
        .expect("create from export");
    let layer = graph.store().layer_dir(&copy.id);
    for name in FILES {
        assert_eq!(fs::read(layer.join(&name[1..])).expect("read"), CONTENT);
    }
}

// ── Concurrency ──────────────────────────────────────────────────────

#[test]
fn concurrent_creates_do_not_interfere() {
    let (_dir, graph) = temp_graph();
    let archive = fake_tar();

    let ids: Vec<ImageId> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let graph = &graph;
                let archive = &archive;
                scope.spawn(move || {
                    graph
                        .create(archive.as_slice(), None, &format!("worker {n}"))
                        .expect("create")
                        .id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_n_images(&graph, 8);
    for id in &ids {
        let layer = graph.store().layer_dir(id);
        assert_eq!(fs::read(layer.join("etc/passwd")).expect("read"), CONTENT);
    }
}

#[test]
fn readers_never_see_partial_images() {
    let (_dir, graph) = temp_graph();
    let archive = fake_tar();
    let id = ImageId::generate();

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for round in 0..20 {
                let image = Image::with_id(id.clone(), None, format!("round {round}"));
                let _ = graph.register(archive.as_slice(), &image).expect("register");
                if round % 2 == 1 {
                    graph.delete(&id).expect("delete");
                }
            }
        });

        while !writer.is_finished() {
            for image in graph.all().expect("all") {
                assert_eq!(image.id, id);
                assert!(image.created.is_some());
                assert!(image.comment.starts_with("round "));
            }
        }
        writer.join().unwrap();
    });

    assert_n_images(&graph, 0);
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn reregistered_image_stays_visible() {
    let (_dir, graph) = temp_graph();
    let archive = fake_tar();
    let id = ImageId::generate();
    let _ = graph
        .register(archive.as_slice(), &Image::with_id(id.clone(), None, "round 0"))
        .expect("register");

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for round in 1..20 {
                let image = Image::with_id(id.clone(), None, format!("round {round}"));
                let _ = graph.register(archive.as_slice(), &image).expect("register");
            }
        });

        while !writer.is_finished() {
            let image = graph.get(&id).expect("image visible throughout");
            assert!(image.comment.starts_with("round "));
            assert!(graph.store().layer_dir(&id).is_dir());
        }
        writer.join().unwrap();
    });

    assert_eq!(graph.get(&id).expect("get").comment, "round 19");
    assert_n_images(&graph, 1);
}

// ── Mount ────────────────────────────────────────────────────────────

#[test]
fn mount_presents_layer_content() {
    let (dir, graph) = temp_graph();
    let image = graph
        .create(fake_tar().as_slice(), None, "Testing")
        .expect("create");
    validate_id(image.id.as_str()).expect("valid id");
    assert_n_images(&graph, 1);

    let (rootfs, rw) = mount_dirs(dir.path());
    let assembler = MountAssembler::new(CopyDriver::default());
    assembler.mount(&graph, &image, &rootfs, &rw).expect("mount");

    for name in FILES {
        let content = fs::read(rootfs.join(&name[1..])).expect("file in rootfs");
        assert_eq!(content, CONTENT);
    }
    assembler.unmount(&rootfs).expect("unmount");
}

#[test]
fn mount_applies_upper_layers_last() {
    let (dir, graph) = temp_graph();
    let base = graph
        .create(
            tar_of(&[("etc/motd", "base\n".as_bytes()), ("etc/issue", "base\n".as_bytes())]).as_slice(),
            None,
            "base",
        )
        .expect("base");
    let top = graph
        .create(tar_of(&[("etc/motd", "top\n".as_bytes())]).as_slice(), Some(&base.id), "top")
        .expect("top");

    let (rootfs, rw) = mount_dirs(dir.path());
    fs::write(rw.join("scratch"), b"rw\n").expect("write rw");
    let assembler = MountAssembler::new(CopyDriver::default());
    assembler.mount(&graph, &top, &rootfs, &rw).expect("mount");

    assert_eq!(fs::read(rootfs.join("etc/motd")).expect("motd"), b"top\n");
    assert_eq!(fs::read(rootfs.join("etc/issue")).expect("issue"), b"base\n");
    assert_eq!(fs::read(rootfs.join("scratch")).expect("scratch"), b"rw\n");
    assembler.unmount(&rootfs).expect("unmount");
}

#[test]
fn mount_of_orphan_fails_with_not_found() {
    let (dir, graph) = temp_graph();
    let orphan = graph
        .create(fake_tar().as_slice(), Some(&ImageId::generate()), "orphan")
        .expect("create with unresolved parent");

    let (rootfs, rw) = mount_dirs(dir.path());
    let assembler = MountAssembler::new(CopyDriver::default());
    let err = assembler.mount(&graph, &orphan, &rootfs, &rw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unmount_without_mount_fails() {
    let (dir, _graph) = temp_graph();
    let (rootfs, _rw) = mount_dirs(dir.path());
    let assembler = MountAssembler::new(CopyDriver::default());
    assert_eq!(assembler.unmount(&rootfs).unwrap_err().kind(), ErrorKind::Mount);
}

#[test]
#[ignore = "requires root and OverlayFS"]
fn overlay_mount_and_unmount() {
    let (dir, graph) = temp_graph();
    let image = graph
        .create(fake_tar().as_slice(), None, "Testing")
        .expect("create");

    let (rootfs, rw) = mount_dirs(dir.path());
    let assembler = MountAssembler::overlay();
    assembler.mount(&graph, &image, &rootfs, &rw).expect("mount");
    let contents: Vec<_> = FILES
        .iter()
        .map(|name| fs::read(rootfs.join(&name[1..])))
        .collect();
    let second = assembler.mount(&graph, &image, &rootfs, &rw);
    assembler.unmount(&rootfs).expect("unmount");

    for content in contents {
        assert_eq!(content.expect("file in rootfs"), CONTENT);
    }
    assert_eq!(second.unwrap_err().kind(), ErrorKind::Mount);
    assert_eq!(assembler.unmount(&rootfs).unwrap_err().kind(), ErrorKind::Mount);
}
