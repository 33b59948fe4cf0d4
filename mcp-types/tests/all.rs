// Single integration-test binary: compiling one binary for the whole suite
// is much faster than one binary per file.
mod suite;
