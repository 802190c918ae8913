//! 生命周期不变量的 CPU 镜像测试
//!
//! 用顺序代码逐字复刻三个 compute 阶段对计数器与索引列表的操作
//! （kickoff 的钳制与翻转、emit 的出栈、simulate 的单一路由），
//! 在没有 GPU 的环境里验证守恒律、划分律、饱和界与精确退场时刻。
//! 浮点运算同为 f32，退场时刻与 shader 一致。

use game_engine_particles::render::particles::Counter;
use proptest::prelude::*;

/// 单发射器的顺序镜像
///
/// `dead` 是栈（顶部即 GPU 上 `dead_count - 1` 指向的槽位），
/// `alive` 是双缓冲列表加选择位。
struct CpuEmitter {
    capacity: u32,
    /// 槽位剩余寿命
    life: Vec<f32>,
    dead: Vec<u32>,
    alive: [Vec<u32>; 2],
    selector: usize,
    counters: Counter,
    spawn_life: f32,
    dt: f32,
}

impl CpuEmitter {
    fn new(capacity: u32, spawn_life: f32, dt: f32) -> Self {
        Self {
            capacity,
            life: vec![0.0; capacity as usize],
            dead: (0..capacity).collect(),
            alive: [Vec::new(), Vec::new()],
            selector: 0,
            counters: Counter::all_dead(capacity),
            spawn_life,
            dt,
        }
    }

    /// 一个 tick：Kickoff → Emit → Simulate
    fn tick(&mut self, requested: u32) {
        // Kickoff：滚动计数器、钳制发射数、翻转选择位
        let survivors = self.counters.alive_count_after_sim;
        self.counters.alive_count = survivors;
        self.counters.alive_count_after_sim = 0;
        let emit = requested.min(self.counters.dead_count);
        self.counters.emit_count = emit;
        self.selector = 1 - self.selector;
        self.alive[1 - self.selector].clear();

        // Emit：从死亡列表出栈、初始化记录、追加到当前存活列表
        for _ in 0..emit {
            self.counters.dead_count -= 1;
            let slot = self.dead.pop().expect("dead stack matches dead_count");
            self.life[slot as usize] = self.spawn_life;
            self.alive[self.selector].push(slot);
            self.counters.alive_count += 1;
        }

        // Simulate：每个存活槽位路由到恰好一个去向
        for idx in 0..self.counters.alive_count as usize {
            let slot = self.alive[self.selector][idx];
            if self.life[slot as usize] <= 0.0 {
                self.dead.push(slot);
                self.counters.dead_count += 1;
            } else {
                self.life[slot as usize] -= self.dt;
                self.alive[1 - self.selector].push(slot);
                self.counters.alive_count_after_sim += 1;
            }
        }
    }

    fn assert_conserved(&self) {
        assert!(
            self.counters.is_conserved(self.capacity),
            "dead {} + after_sim {} != {}",
            self.counters.dead_count,
            self.counters.alive_count_after_sim,
            self.capacity
        );
    }

    /// 划分律：死亡列表与下一存活列表不重不漏覆盖全部槽位
    fn assert_partitioned(&self) {
        let mut seen = vec![false; self.capacity as usize];
        for &slot in self.dead.iter().chain(self.alive[1 - self.selector].iter()) {
            assert!(!seen[slot as usize], "slot {} duplicated", slot);
            seen[slot as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "some slot lost");
    }
}

#[test]
fn scenario_fills_without_deaths_for_ten_ticks() {
    // N=1024，每 tick 发射 100，dt=0.1，寿命 1.0：
    // 前 10 个 tick 没有任何退场
    let mut emitter = CpuEmitter::new(1024, 1.0, 0.1);
    for tick in 1..=10 {
        emitter.tick(100);
        emitter.assert_conserved();
        emitter.assert_partitioned();
        assert_eq!(
            emitter.counters.alive_count_after_sim,
            tick * 100,
            "no particle may retire before its lifetime elapses"
        );
    }
    assert_eq!(emitter.counters.alive_count_after_sim, 1000);
    assert_eq!(emitter.counters.dead_count, 24);
}

#[test]
fn steady_state_balances_emission_and_retirement() {
    let mut emitter = CpuEmitter::new(1024, 1.0, 0.1);
    for _ in 1..=10 {
        emitter.tick(100);
    }

    // 第 11 个 tick：第 1 批粒子寿命耗尽退场；发射被剩余死亡槽位
    // （24 个）钳制，槽位回收存在一个 tick 的滞后
    emitter.tick(100);
    emitter.assert_conserved();
    emitter.assert_partitioned();
    assert_eq!(emitter.counters.emit_count, 24);
    assert_eq!(emitter.counters.alive_count_after_sim, 924);
    assert_eq!(emitter.counters.dead_count, 100);

    // 长期运行：发射与退场平衡，幸存数在固定区间内振荡且永不越界
    for _ in 12..=300 {
        emitter.tick(100);
        emitter.assert_conserved();
        emitter.assert_partitioned();
        assert!(emitter.counters.alive_count_after_sim >= 924);
        assert!(emitter.counters.alive_count_after_sim <= 1000);
    }
}

#[test]
fn saturation_never_exceeds_capacity() {
    // 不死粒子 + 超量发射请求：发射静默饱和，幸存数止步于容量
    let mut emitter = CpuEmitter::new(64, f32::MAX, 0.1);
    for _ in 0..5 {
        emitter.tick(1000);
        emitter.assert_conserved();
        emitter.assert_partitioned();
        assert!(emitter.counters.alive_count_after_sim <= 64);
    }
    assert_eq!(emitter.counters.alive_count_after_sim, 64);
    assert_eq!(emitter.counters.dead_count, 0);

    // 容量占满后继续请求：emit 被钳制为 0
    emitter.tick(1000);
    assert_eq!(emitter.counters.emit_count, 0);
    assert_eq!(emitter.counters.alive_count_after_sim, 64);
}

#[test]
fn retirement_happens_on_exact_tick() {
    // 寿命恰好整除时间步长：粒子存活满 life/dt 个 tick，
    // 在下一个 tick 退场，不早不晚
    let mut emitter = CpuEmitter::new(8, 1.0, 0.1);
    emitter.tick(1);
    assert_eq!(emitter.counters.alive_count_after_sim, 1);

    for _ in 2..=10 {
        emitter.tick(0);
        assert_eq!(emitter.counters.alive_count_after_sim, 1, "retired early");
    }
    emitter.tick(0);
    assert_eq!(emitter.counters.alive_count_after_sim, 0, "retired late");
    emitter.assert_conserved();
    emitter.assert_partitioned();
}

#[test]
fn life_decreases_monotonically() {
    let mut emitter = CpuEmitter::new(8, 2.0, 0.25);
    emitter.tick(1);
    let slot = emitter.alive[1 - emitter.selector][0] as usize;
    let mut previous = emitter.life[slot];
    while emitter.counters.alive_count_after_sim == 1 {
        emitter.tick(0);
        let current = emitter.life[slot];
        if emitter.counters.alive_count_after_sim == 1 {
            assert!(current < previous);
            previous = current;
        }
    }
}

#[test]
fn zero_request_rolls_counters_without_mutation() {
    let mut emitter = CpuEmitter::new(16, 1.0, 0.1);
    emitter.tick(4);
    let before_dead = emitter.dead.clone();
    emitter.tick(0);
    assert_eq!(emitter.counters.emit_count, 0);
    assert_eq!(emitter.dead, before_dead);
    emitter.assert_partitioned();
}

proptest! {
    /// 任意容量与发射序列下，守恒律与划分律每个 tick 都成立
    #[test]
    fn conservation_and_partition_hold(
        capacity in 1u32..256,
        requests in prop::collection::vec(0u32..300, 1..40),
        spawn_life in 0.05f32..2.0,
        dt in 0.01f32..0.5,
    ) {
        let mut emitter = CpuEmitter::new(capacity, spawn_life, dt);
        for requested in requests {
            emitter.tick(requested);
            emitter.assert_conserved();
            emitter.assert_partitioned();
            prop_assert!(emitter.counters.alive_count_after_sim <= capacity);
        }
    }

    /// 发射数永远不超过请求数，也不超过可用的死亡槽位
    #[test]
    fn emit_count_is_clamped(
        capacity in 1u32..128,
        requests in prop::collection::vec(0u32..200, 1..20),
    ) {
        let mut emitter = CpuEmitter::new(capacity, f32::MAX, 0.1);
        for requested in requests {
            let dead_before = emitter.counters.dead_count;
            emitter.tick(requested);
            prop_assert!(emitter.counters.emit_count <= requested);
            prop_assert!(emitter.counters.emit_count <= dead_before);
        }
    }
}
