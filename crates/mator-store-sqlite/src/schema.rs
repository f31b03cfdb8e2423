//! SQL schema for the snapshot database.
//!
//! The table and column names are read by the path-selection tooling; keep
//! them stable.

/// Full schema DDL, executed once when the store is created.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id          INTEGER PRIMARY KEY,
    fingerprint VARCHAR
);

CREATE TABLE IF NOT EXISTS families (
    ida        INT,
    idb        INT,
    start_time DATETIME,
    end_time   DATETIME
);

CREATE TABLE IF NOT EXISTS descriptors (
    node_id            INT NOT NULL,
    nickname           VARCHAR(19) NOT NULL DEFAULT 'Unnamed',
    address            VARCHAR(32) NOT NULL,
    bandwidth_avg      INT(12),
    bandwidth_burst    INT(12),
    bandwidth_observed INT(12),
    platform           VARCHAR(20),
    version            VARCHAR(20),
    hibernating        BOOLEAN NOT NULL DEFAULT 0,
    exit_policy        TEXT,      -- 'accept <rule>' lines, then 'reject <rule>' lines
    start_time         DATETIME NOT NULL,
    end_time           DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS geoip (
    ip        VARCHAR(32),
    country   VARCHAR(8),
    lat       REAL,
    long      REAL,
    as_number INTEGER,
    as_name   VARCHAR(128)
);

PRAGMA user_version = 1;
";

pub const INSERT_NODE: &str = "INSERT INTO nodes (id, fingerprint) VALUES (?1, ?2)";

pub const INSERT_DESCRIPTOR: &str = "INSERT INTO descriptors (
     node_id, nickname, address, bandwidth_avg, bandwidth_burst,
     bandwidth_observed, platform, version, hibernating, exit_policy,
     start_time, end_time
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

pub const INSERT_FAMILY: &str =
  "INSERT INTO families (ida, idb, start_time, end_time) VALUES (?1, ?2, ?3, ?4)";

pub const INSERT_GEOIP: &str = "INSERT INTO geoip (ip, country, lat, long, as_number, as_name)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
