//! Lua scripts for the Redis job queue.
//!
//! Every job state transition runs as one script so that concurrent
//! workers and admin calls never observe a half-applied move.

// Atomically claim a unique key (if any) and store a new job.
//
// KEYS[1]: job hash key
// KEYS[2]: target sorted set (wait or delayed set of the job's type)
// KEYS[3]: unique key claim (ignored when ARGV[3] is '0')
// KEYS[4]: index of all jobs
// ARGV[1]: job id
// ARGV[2]: score in the target set
// ARGV[3]: '1' when the job has a unique key
// ARGV[4]: created_at ms
// ARGV[5]: job key prefix
// ARGV[6..]: hash field/value pairs
//
// Returns: id of the stored job, or of the unfinished job holding the key
pub static ENQUEUE_SCRIPT: &str = r#"
local job_id = ARGV[1]

if ARGV[3] == '1' then
    local existing = redis.call('GET', KEYS[3])
    if existing and redis.call('EXISTS', ARGV[5] .. existing) == 1 then
        return existing
    end
    redis.call('SET', KEYS[3], job_id)
end

local fields = {}
for i = 6, #ARGV do
    fields[#fields + 1] = ARGV[i]
end
redis.call('HSET', KEYS[1], unpack(fields))
redis.call('ZADD', KEYS[2], ARGV[2], job_id)
redis.call('ZADD', KEYS[4], ARGV[4], job_id)
return job_id
"#;

// Move due delayed jobs of one type into its wait set.
//
// KEYS[1]: wait set
// KEYS[2]: delayed set
// ARGV[1]: now ms
// ARGV[2]: job key prefix
//
// Returns: number of jobs promoted
pub static PROMOTE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)

for _, id in ipairs(due) do
    local job_key = ARGV[2] .. id
    local priority = tonumber(redis.call('HGET', job_key, 'priority') or '0')
    local status = 'waiting'
    if priority > 0 then
        status = 'prioritized'
    end
    redis.call('ZREM', KEYS[2], id)
    redis.call('ZADD', KEYS[1], -priority * 1000000000000 + now, id)
    redis.call('HSET', job_key, 'status', status)
end

return #due
"#;

// Claim the next job of one type unless the queue is paused.
//
// KEYS[1]: wait set
// KEYS[2]: active hash
// KEYS[3]: paused flag
// ARGV[1]: now ms
// ARGV[2]: worker id
// ARGV[3]: job key prefix
//
// Returns: claimed job id, or nil
pub static DEQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
    return false
end

local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end

local id = popped[1]
redis.call('HSET', ARGV[3] .. id, 'status', 'active', 'started_at', ARGV[1])
redis.call('HSET', KEYS[2], id, ARGV[2])
return id
"#;

// Mark an active job completed and release its unique key.
//
// KEYS[1]: job hash key
// KEYS[2]: active hash
// KEYS[3]: completed set
// ARGV[1]: job id
// ARGV[2]: now ms
// ARGV[3]: return value JSON
// ARGV[4]: unique key prefix
//
// Returns: 1 on success, 0 if the job was not active
pub static COMPLETE_SCRIPT: &str = r#"
if redis.call('HDEL', KEYS[2], ARGV[1]) == 0 then
    return 0
end

redis.call('HSET', KEYS[1], 'status', 'completed', 'finished_at', ARGV[2], 'return_value', ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])

local unique = redis.call('HGET', KEYS[1], 'unique_key')
if unique and unique ~= '' then
    local unique_key = ARGV[4] .. unique
    if redis.call('GET', unique_key) == ARGV[1] then
        redis.call('DEL', unique_key)
    end
end
return 1
"#;

// Record a failure on an active job. Schedules an automatic retry while
// attempts < max_attempts, otherwise moves the job to failed and releases
// its unique key.
//
// KEYS[1]: job hash key
// KEYS[2]: active hash
// KEYS[3]: delayed set of the job's type
// KEYS[4]: failed set
// ARGV[1]: job id
// ARGV[2]: now ms
// ARGV[3]: error message
// ARGV[4]: retry run-at ms
// ARGV[5]: unique key prefix
//
// Returns: -1 if the job was not active, 0 when failed for good,
//          otherwise the number of the next attempt
pub static FAIL_SCRIPT: &str = r#"
if redis.call('HDEL', KEYS[2], ARGV[1]) == 0 then
    return -1
end

local attempts = tonumber(redis.call('HGET', KEYS[1], 'attempts') or '1')
local max_attempts = tonumber(redis.call('HGET', KEYS[1], 'max_attempts') or '1')
redis.call('HSET', KEYS[1], 'last_error', ARGV[3])

if attempts < max_attempts then
    redis.call('HSET', KEYS[1], 'attempts', attempts + 1, 'status', 'delayed')
    redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
    return attempts + 1
end

redis.call('HSET', KEYS[1], 'status', 'failed', 'finished_at', ARGV[2])
redis.call('ZADD', KEYS[4], ARGV[2], ARGV[1])

local unique = redis.call('HGET', KEYS[1], 'unique_key')
if unique and unique ~= '' then
    local unique_key = ARGV[5] .. unique
    if redis.call('GET', unique_key) == ARGV[1] then
        redis.call('DEL', unique_key)
    end
end
return 0
"#;

// Move a failed job back to its wait set and count the attempt.
//
// KEYS[1]: job hash key
// KEYS[2]: failed set
// KEYS[3]: wait set of the job's type
// ARGV[1]: job id
// ARGV[2]: now ms
// ARGV[3]: unique key prefix
//
// Returns: 1 on success, 0 if the job is missing or not failed
pub static RETRY_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'failed' then
    return 0
end

local priority = tonumber(redis.call('HGET', KEYS[1], 'priority') or '0')
local status = 'waiting'
if priority > 0 then
    status = 'prioritized'
end

redis.call('HINCRBY', KEYS[1], 'attempts', 1)
redis.call('HSET', KEYS[1], 'status', status)
redis.call('HDEL', KEYS[1], 'finished_at', 'last_error')
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], -priority * 1000000000000 + tonumber(ARGV[2]), ARGV[1])

local unique = redis.call('HGET', KEYS[1], 'unique_key')
if unique and unique ~= '' then
    redis.call('SET', ARGV[3] .. unique, ARGV[1], 'NX')
end
return 1
"#;

// Delete a job that is not active.
//
// KEYS[1]: job hash key
// KEYS[2]: wait set of the job's type
// KEYS[3]: delayed set of the job's type
// KEYS[4]: completed set
// KEYS[5]: failed set
// KEYS[6]: index of all jobs
// ARGV[1]: job id
// ARGV[2]: unique key prefix
//
// Returns: 1 when removed, 0 when missing, -1 when active
pub static REMOVE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 0
end
if status == 'active' then
    return -1
end

for i = 2, 6 do
    redis.call('ZREM', KEYS[i], ARGV[1])
end

local unique = redis.call('HGET', KEYS[1], 'unique_key')
if unique and unique ~= '' then
    local unique_key = ARGV[2] .. unique
    if redis.call('GET', unique_key) == ARGV[1] then
        redis.call('DEL', unique_key)
    end
end

redis.call('DEL', KEYS[1])
return 1
"#;

// Compare-and-set the next run of a schedule.
//
// KEYS[1]: schedule next-run set
// ARGV[1]: schedule id
// ARGV[2]: expected next run ms
// ARGV[3]: new next run ms
//
// Returns: 1 when advanced, 0 when the schedule is gone or changed
pub static ADVANCE_SCHEDULE_SCRIPT: &str = r#"
local current = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not current or tonumber(current) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

// Delete finished jobs older than a cutoff from one finished set.
//
// KEYS[1]: completed or failed set
// KEYS[2]: index of all jobs
// ARGV[1]: cutoff ms (exclusive)
// ARGV[2]: job key prefix
//
// Returns: number of jobs deleted
pub static CLEAN_SCRIPT: &str = r#"
local cutoff = '(' .. ARGV[1]
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', cutoff)

for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[2] .. id)
    redis.call('ZREM', KEYS[2], id)
end

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', cutoff)
return #ids
"#;

// Take a lease if it is free or already ours, then set its TTL.
//
// KEYS[1]: lease hash key
// ARGV[1]: holder id
// ARGV[2]: ttl ms
// ARGV[3]: now ms
//
// Returns: 1 when held by the caller, 0 otherwise
pub static LEASE_ACQUIRE_SCRIPT: &str = r#"
local holder = redis.call('HGET', KEYS[1], 'holder')
if holder and holder ~= ARGV[1] then
    return 0
end
if not holder then
    redis.call('HSET', KEYS[1], 'holder', ARGV[1], 'acquired_at', ARGV[3])
end
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
"#;

// Extend a lease held by the caller.
//
// KEYS[1]: lease hash key
// ARGV[1]: holder id
// ARGV[2]: ttl ms
//
// Returns: 1 when extended, 0 when not held by the caller
pub static LEASE_RENEW_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder') == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

// Delete a lease held by the caller.
//
// KEYS[1]: lease hash key
// ARGV[1]: holder id
//
// Returns: 1 when released, 0 when not held by the caller
pub static LEASE_RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder') == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;
