//! 编译期生成 GIT_SHA、BUILD_TIMESTAMP 等元信息（供 version.rs 使用）

use vergen::EmitBuilder;

fn main() {
    // 非 git 目录下构建时 vergen 会输出默认值，这里不让构建失败
    let _ = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit();
}
