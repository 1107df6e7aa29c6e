//! Python snippet catalog
//!
//! Every filesystem operation is a pre-written MicroPython snippet with
//! the caller's paths spliced in. All interpolation goes through
//! [`py_str`], so a path containing a quote or backslash cannot break
//! the snippet or inject code.
//!
//! Snippet bodies sit at column zero: the device sees them exactly as
//! written here, indentation included.

use crate::util::py_str;

/// Bytes per base64 line when downloading
pub const GET_CHUNK: usize = 1024;

/// Input bytes per `a2b_base64` write when uploading
pub const PUT_CHUNK: usize = 128;

/// List a directory; one `path | d|f | size` record per line.
pub fn list_files(dir: &str, recursive: bool) -> String {
	format!(
		r#"import os
def _ls(d, r):
    for e in os.ilistdir(d):
        n = e[0]
        p = (d + '/' + n) if d != '/' else '/' + n
        t = 'd' if e[1] & 0x4000 else 'f'
        s = e[3] if t == 'f' and len(e) > 3 else 0
        print(p + ' | ' + t + ' | ' + str(s))
        if r and t == 'd':
            _ls(p, r)
        pass
_ls({}, {})
"#,
		py_str(dir),
		if recursive { "True" } else { "False" }
	)
}

/// Stat a path; prints `exists,isdir,size,atime,mtime` as CSV.
pub fn stat_path(path: &str) -> String {
	format!(
		r#"import os
try:
    s = os.stat({})
    print('1,%d,%d,%d,%d' % (1 if s[0] & 0x4000 else 0, s[6], s[7], s[8]))
except OSError:
    print('0,0,0,0,0')
"#,
		py_str(path)
	)
}

/// Download a file: base64 chunks, one per line, empty line at EOF.
pub fn get_file(path: &str) -> String {
	format!(
		r#"import ubinascii
f = open({}, 'rb')
while True:
    b = f.read({})
    if not b:
        break
    print(ubinascii.b2a_base64(b).decode().strip())
f.close()
print()
"#,
		py_str(path),
		GET_CHUNK
	)
}

/// Upload a file: open-for-write plus one base64 write per chunk.
/// The response is discarded on success.
pub fn put_file(path: &str, data: &[u8]) -> String {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine as _;

	let mut script = String::with_capacity(data.len() * 2 + 128);
	script.push_str("import ubinascii\n");
	script.push_str(&format!("f = open({}, 'wb')\n", py_str(path)));
	for chunk in data.chunks(PUT_CHUNK) {
		script.push_str(&format!("f.write(ubinascii.a2b_base64('{}'))\n", STANDARD.encode(chunk)));
	}
	script.push_str("f.close()\n");
	script
}

/// SHA-256 of a file, printed as lowercase hex.
pub fn file_hash(path: &str) -> String {
	format!(
		r#"import uhashlib, ubinascii
h = uhashlib.sha256()
f = open({}, 'rb')
while True:
    b = f.read({})
    if not b:
        break
    h.update(b)
f.close()
print(ubinascii.hexlify(h.digest()).decode())
"#,
		py_str(path),
		GET_CHUNK
	)
}

pub fn mkdir(path: &str) -> String {
	format!("import os\nos.mkdir({})\n", py_str(path))
}

pub fn remove_file(path: &str) -> String {
	format!("import os\nos.remove({})\n", py_str(path))
}

pub fn remove_dir(path: &str) -> String {
	format!("import os\nos.rmdir({})\n", py_str(path))
}

pub fn rename(old: &str, new: &str) -> String {
	format!("import os\nos.rename({}, {})\n", py_str(old), py_str(new))
}

/// Platform, release, version, machine and free heap, one per line.
pub fn board_info() -> String {
	r#"import sys, os, gc
u = os.uname()
gc.collect()
print(sys.platform)
print(u.release)
print(u.version)
print(u.machine)
print(gc.mem_free())
"#
	.to_string()
}


// vim: ts=4
