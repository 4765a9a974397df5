use snapfs::{Credentials, FileStore, SnapFs};

pub fn main() {
    env_logger::init();

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).expect("could not open snapshot store");
    let mut fs =
        SnapFs::load_or_format(store, Credentials::current_user()).expect("could not format");

    fs.mkdir("/docs", 0o755).unwrap();
    fs.create("/docs/readme.txt", 0o644).unwrap();
    fs.write("/docs/readme.txt", b"every mutation lands on disk\n", 0)
        .unwrap();

    let content = fs.read("/docs/readme.txt", 0, 4096).unwrap();
    print!("{}", String::from_utf8_lossy(&content));

    for entry in fs.readdir("/docs").unwrap() {
        println!("{}", entry);
    }

    let stats = fs.statfs();
    println!(
        "{} of {} blocks free, {} of {} inodes free",
        stats.blocks_free, stats.blocks_total, stats.inodes_free, stats.inodes_total
    );
}
